//! Data side of the core: the hosted backend boundary and its
//! implementations, the CRUD facade with local fallback, the optimistic
//! state store and the salary-management hook built on top of them.

pub mod backend;
pub mod context;
pub mod facade;
pub mod leave_requests;
pub mod memory;
pub mod notifications;
pub mod optimistic;
pub mod rest;
pub mod salaries;
pub mod salary_management;
pub mod time_entries;

pub use backend::{BackendError, Filter, HostedBackend};
pub use context::AppContext;
pub use facade::{Facade, FacadeError};
pub use memory::MemoryBackend;
pub use optimistic::{Mutation, OptimisticStore};
pub use rest::RestBackend;
pub use salary_management::SalaryManagement;
