//! User service
//!
//! Accounts own courses and items and enroll in courses as students.

use crate::db::is_unique_violation_on;
use crate::db::repositories::UserRepository;
use crate::models::{CreateUserInput, User};
use crate::services::password::hash_password;
use anyhow::Context;
use std::sync::Arc;

const MAX_USERNAME_LENGTH: usize = 150;

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Create an account, hashing the password with Argon2id
    pub async fn create_user(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        validate_create_input(&input)?;
        let username = input.username.trim().to_string();

        if self
            .repo
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(username));
        }

        let password_hash = hash_password(&input.password)?;
        let mut user = User::new(username.clone(), input.email.trim().to_string(), password_hash);
        user.first_name = input.first_name.trim().to_string();
        user.last_name = input.last_name.trim().to_string();

        match self.repo.create(&user).await {
            Ok(created) => {
                tracing::info!(user_id = created.id, username = %created.username, "User created");
                Ok(created)
            }
            // Lost a race with a concurrent registration
            Err(e) if is_unique_violation_on(&e, "username") => Err(UserServiceError::UserExists(username)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self.repo.get_by_id(id).await.context("Failed to get user by ID")?)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .repo
            .get_by_username(username)
            .await
            .context("Failed to get user by username")?)
    }

    /// Like [`get_by_id`](Self::get_by_id) but a missing user is an error
    pub async fn require(&self, id: i64) -> Result<User, UserServiceError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| UserServiceError::UserNotFound(format!("User with ID {} not found", id)))
    }

    pub async fn list(&self) -> Result<Vec<User>, UserServiceError> {
        Ok(self.repo.list().await.context("Failed to list users")?)
    }

    pub async fn count(&self) -> Result<i64, UserServiceError> {
        Ok(self.repo.count().await.context("Failed to count users")?)
    }
}

fn validate_create_input(input: &CreateUserInput) -> Result<(), UserServiceError> {
    let username = input.username.trim();
    if username.is_empty() {
        return Err(UserServiceError::ValidationError("Username cannot be empty".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(UserServiceError::ValidationError(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !input.email.contains('@') {
        return Err(UserServiceError::ValidationError(format!(
            "Invalid email address: {}",
            input.email
        )));
    }
    if input.password.is_empty() {
        return Err(UserServiceError::ValidationError("Password cannot be empty".to_string()));
    }
    Ok(())
}
