use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// 带 TTL 与容量上限的进程内缓存，只做加速，不作为任何权威记录
#[derive(Clone)]
pub struct CacheService<K, V> {
    cache: Arc<Cache<K, V>>,
}

impl<K, V> CacheService<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// 新建缓存服务
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        CacheService {
            cache: Arc::new(cache),
        }
    }

    /// 获取缓存，如果没有命中则返回 None
    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).await
    }

    /// 获取缓存，未命中时调用 loader 加载；loader 失败时不写入缓存
    ///
    /// 同一个 key 的并发未命中只会触发一次 loader。
    pub async fn try_get_or_load<F, Fut, E>(&self, key: K, loader: F) -> Result<V, Arc<E>>
    where
        F: FnOnce(K) -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        self.cache
            .try_get_with(key.clone(), async move { loader(key).await })
            .await
    }

    /// 强制写入缓存
    pub async fn insert(&self, key: K, value: V) {
        self.cache.insert(key, value).await;
    }

    /// 删除某个 key
    pub async fn invalidate(&self, key: &K) {
        self.cache.invalidate(key).await;
    }

    /// 清空全部缓存
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_get_or_load_does_not_cache_errors() {
        let cache: CacheService<String, String> = CacheService::new(Duration::from_secs(60), 100);

        let failed = cache
            .try_get_or_load("k".to_string(), |_key| async { Err::<String, &str>("boom") })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.get(&"k".to_string()).await, None);

        let loaded = cache
            .try_get_or_load("k".to_string(), |key| async move { Ok::<_, &str>(format!("value_for_{}", key)) })
            .await
            .unwrap();
        assert_eq!(loaded, "value_for_k");

        // 命中缓存时不会调用 loader
        let cached = cache
            .try_get_or_load("k".to_string(), |_key| async { Err::<String, &str>("not called") })
            .await
            .unwrap();
        assert_eq!(cached, "value_for_k");

        cache.invalidate(&"k".to_string()).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache: CacheService<String, u32> = CacheService::new(Duration::from_millis(50), 10);
        cache.insert("a".to_string(), 1).await;
        assert_eq!(cache.get(&"a".to_string()).await, Some(1));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get(&"a".to_string()).await, None);
    }
}
