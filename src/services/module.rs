//! Module service
//!
//! Modules are ordered within their course. An order left out on creation is
//! assigned as one past the course's current maximum by the insert itself,
//! and the `(course_id, sort_order)` index rejects any duplicate.

use crate::config::OrderingConfig;
use crate::db::repositories::{CourseRepository, ModuleRepository};
use crate::db::{is_permutation, is_unique_violation_on, MODULE_ORDER};
use crate::models::{CreateModuleInput, Module, UpdateModuleInput};
use anyhow::Context;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ModuleServiceError {
    /// The order is already held by a sibling. `order` is `None` when it
    /// was being auto-assigned.
    #[error("Order {order:?} is already taken in course {scope}")]
    ScopeConflict { scope: i64, order: Option<i32> },

    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Course not found: {0}")]
    CourseNotFound(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct ModuleService {
    repo: Arc<dyn ModuleRepository>,
    courses: Arc<dyn CourseRepository>,
    max_attempts: u32,
}

impl ModuleService {
    pub fn new(
        repo: Arc<dyn ModuleRepository>,
        courses: Arc<dyn CourseRepository>,
        ordering: &OrderingConfig,
    ) -> Self {
        Self {
            repo,
            courses,
            max_attempts: ordering.max_attempts.max(1),
        }
    }

    /// Create a module, at the end of the course unless an order is given.
    ///
    /// # Errors
    /// - `ScopeConflict` for a taken explicit order, or when auto-assignment
    ///   keeps colliding with concurrent inserts
    /// - `CourseNotFound` if the course does not exist
    pub async fn create(&self, input: CreateModuleInput) -> Result<Module, ModuleServiceError> {
        if let Some(order) = input.order {
            if order < 0 {
                return Err(ModuleServiceError::ValidationError(format!(
                    "Order must be non-negative, got {}",
                    order
                )));
            }
        }
        self.ensure_course(input.course_id).await?;

        let mut attempt = 1;
        loop {
            match self.repo.create(&input).await {
                Ok(module) => {
                    tracing::info!(
                        module_id = module.id,
                        course_id = module.course_id,
                        order = module.order,
                        "Module created"
                    );
                    return Ok(module);
                }
                Err(e) if is_unique_violation_on(&e, MODULE_ORDER.column) => {
                    let conflict = ModuleServiceError::ScopeConflict {
                        scope: input.course_id,
                        order: input.order,
                    };
                    if input.order.is_some() || attempt >= self.max_attempts {
                        return Err(conflict);
                    }
                    tracing::debug!(course_id = input.course_id, attempt, "Module order taken, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.context("Failed to create module").into()),
            }
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Module>, ModuleServiceError> {
        Ok(self.repo.get_by_id(id).await.context("Failed to get module")?)
    }

    /// Modules of a course by order
    pub async fn list_by_course(&self, course_id: i64) -> Result<Vec<Module>, ModuleServiceError> {
        Ok(self
            .repo
            .list_by_course(course_id)
            .await
            .context("Failed to list modules")?)
    }

    /// Order the next auto-ordered module of the course would get
    pub async fn next_order(&self, course_id: i64) -> Result<i32, ModuleServiceError> {
        Ok(self
            .repo
            .next_order(course_id)
            .await
            .context("Failed to compute next module order")?)
    }

    pub async fn update(&self, id: i64, input: UpdateModuleInput) -> Result<Module, ModuleServiceError> {
        let mut module = self.require(id).await?;

        if let Some(title) = input.title {
            module.title = title;
        }
        if let Some(description) = input.description {
            module.description = description;
        }

        Ok(self.repo.update(&module).await.context("Failed to update module")?)
    }

    /// Put a course's modules in the given order. `ordered_ids` must list
    /// every module of the course exactly once.
    pub async fn reorder(&self, course_id: i64, ordered_ids: &[i64]) -> Result<Vec<Module>, ModuleServiceError> {
        self.ensure_course(course_id).await?;

        let current: Vec<i64> = self.list_by_course(course_id).await?.iter().map(|m| m.id).collect();
        if !is_permutation(&current, ordered_ids) {
            return Err(ModuleServiceError::ValidationError(format!(
                "Expected each of the {} modules of course {} exactly once",
                current.len(),
                course_id
            )));
        }

        self.repo
            .reorder(course_id, ordered_ids)
            .await
            .context("Failed to reorder modules")?;
        tracing::info!(course_id, count = ordered_ids.len(), "Modules reordered");
        self.list_by_course(course_id).await
    }

    /// Delete a module with its contents. Later modules move up one.
    pub async fn delete(&self, id: i64) -> Result<(), ModuleServiceError> {
        if !self.repo.delete(id).await.context("Failed to delete module")? {
            return Err(ModuleServiceError::NotFound(format!("Module with ID {} not found", id)));
        }
        tracing::info!(module_id = id, "Module deleted");
        Ok(())
    }

    async fn require(&self, id: i64) -> Result<Module, ModuleServiceError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| ModuleServiceError::NotFound(format!("Module with ID {} not found", id)))
    }

    async fn ensure_course(&self, course_id: i64) -> Result<(), ModuleServiceError> {
        match self.courses.get_by_id(course_id).await.context("Failed to get course")? {
            Some(_) => Ok(()),
            None => Err(ModuleServiceError::CourseNotFound(course_id)),
        }
    }
}
