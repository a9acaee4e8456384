// 插件宿主模块
// 插件实例注册表、生命周期编排、事件分发与健康监视

pub mod context;
pub mod instance;
pub mod runtime;
pub mod events;
pub mod registry;
pub mod lifecycle;
pub mod health;


pub use context::*;
pub use instance::*;
pub use runtime::*;
pub use events::*;
pub use registry::*;
pub use lifecycle::*;
pub use health::*;
