pub mod backend;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod factory;
pub mod reconciler;
pub mod remote;
pub mod state;
pub mod task_runner;

pub use context::AppContext;
pub use errors::AppError;
pub use factory::AppFactory;
