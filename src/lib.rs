// Plugin Host Library
// 插件宿主核心：生命周期管理、事件分发与健康监视

pub mod config;
pub mod errors;
pub mod logging;
pub mod plugins;

pub use errors::{LifecycleOperation, PluginHostError};
pub use plugins::{
    EventBus, HealthMonitor, HealthProbe, OperationContext, PluginDescriptor, PluginEvent,
    PluginEventHandler, PluginEventType, PluginInstance, PluginLifecycleManager, PluginRuntime,
    PluginState, SandboxManager,
};
