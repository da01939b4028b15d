//! # 应用装配模块

pub mod resources;
pub mod services;

pub use resources::AppResources;
pub use services::AppServices;
