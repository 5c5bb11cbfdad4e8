//! Caller identity and the visibility hook.
//!
//! `SecurityContext` is opaque to the core: it is threaded through every
//! operation, shared by `Arc`, and never mutated. What it permits is decided
//! by an [`AccessPolicy`] supplied with the [`Services`](crate::Services).

use std::fmt;

use crate::model::Entity;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Principal {
    SuperUser,
    User(String),
    Anonymous,
}

/// Opaque caller-identity handle.
#[derive(Debug, PartialEq, Eq)]
pub struct SecurityContext {
    principal: Principal,
}

impl SecurityContext {
    pub fn super_user() -> Self {
        Self { principal: Principal::SuperUser }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self { principal: Principal::User(name.into()) }
    }

    pub fn anonymous() -> Self {
        Self { principal: Principal::Anonymous }
    }

    pub fn is_super_user(&self) -> bool {
        self.principal == Principal::SuperUser
    }

    /// User name, if the context belongs to a named user.
    pub fn user_name(&self) -> Option<&str> {
        match &self.principal {
            Principal::User(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.principal {
            Principal::SuperUser => write!(f, "superuser"),
            Principal::User(name) => write!(f, "user:{name}"),
            Principal::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Visibility decision delegated to the permission layer.
pub trait AccessPolicy: Send + Sync {
    fn is_visible(&self, ctx: &SecurityContext, entity: &Entity) -> bool;
}

/// Everything is visible to everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl AccessPolicy for PermitAll {
    fn is_visible(&self, _ctx: &SecurityContext, _entity: &Entity) -> bool {
        true
    }
}

impl<F> AccessPolicy for F
where
    F: Fn(&SecurityContext, &Entity) -> bool + Send + Sync,
{
    fn is_visible(&self, ctx: &SecurityContext, entity: &Entity) -> bool {
        self(ctx, entity)
    }
}
