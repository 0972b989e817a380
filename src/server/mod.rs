pub mod handlers;
pub mod state;

pub use handlers::{
    create_router, DeployRequest, DeployResponse, OperationStatus, StatusResponse, TestResponse,
};
pub use state::AppState;
