// 插件实例注册表
// 插件 ID 到实例状态的内存映射，由一把读写锁保护

use std::collections::HashMap;

use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::plugins::instance::PluginInstance;

pub type PluginMap = HashMap<String, PluginInstance>;

/// 插件注册表
///
/// 所有生命周期操作在整个执行期间持有写锁，因此不同插件的操作也会串行化；
/// 读取方只能拿到快照，不会观察到转换中的实例。
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<PluginMap>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取写锁
    pub async fn write(&self) -> RwLockWriteGuard<'_, PluginMap> {
        self.plugins.write().await
    }

    /// 单个实例的快照
    pub async fn snapshot(&self, plugin_id: &str) -> Option<PluginInstance> {
        self.plugins.read().await.get(plugin_id).cloned()
    }

    /// 全部实例的快照，按插件 ID 排序
    pub async fn snapshot_all(&self) -> Vec<PluginInstance> {
        let plugins = self.plugins.read().await;
        let mut instances: Vec<PluginInstance> = plugins.values().cloned().collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }
}
