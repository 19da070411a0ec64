//! 事件总线系统
//!
//! 提供模块生命周期事件的发布订阅机制。
//!
//! # 主要功能
//!
//! - **模式订阅**: 按点分模式订阅事件类型，支持 `*` 通配段
//! - **串行分发**: 事件按发布顺序逐个分发（总线级 FIFO）
//! - **订阅者隔离**: 单个处理器的失败不影响其他处理器
//! - **失败上报**: 处理器失败以 `module.error` 事件形式上报
//! - **超时控制**: 可选的处理器超时，防止单个订阅者阻塞总线
//!
//! # 使用示例
//!
//! ```ignore
//! use chips_modules::events::{Event, EventBus};
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//!
//! let sub_id = bus.subscribe_fn("module.*", |event| {
//!     println!("收到事件: {}", event.event_type);
//! }).await;
//!
//! bus.publish(Event::new("module.loaded", "cache", json!({}))).await;
//! bus.unsubscribe(&sub_id).await;
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::events::event::{module_events, pattern_matches, Event};
use crate::utils::Result;

/// 事件处理器返回的 Future 类型
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// 事件处理器类型
///
/// 处理器接收事件并返回 Future。同步处理器通过 [`EventBus::subscribe_fn`]
/// 包装为此类型。处理器必须是线程安全的。
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// 订阅标识
pub type SubscriptionId = String;

/// 内部订阅条目
#[derive(Clone)]
struct SubscriptionEntry {
    /// 订阅唯一标识
    subscription_id: SubscriptionId,

    /// 订阅的事件类型模式
    pattern: String,

    /// 事件处理器
    handler: EventHandler,

    /// 订阅时间（用于调试和审计）
    #[allow(dead_code)]
    subscribed_at: DateTime<Utc>,
}

/// 处理器执行失败记录
struct HandlerFailure {
    subscription_id: SubscriptionId,
    pattern: String,
    reason: String,
}

/// 分发统计信息
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// 已发布事件数
    pub published: u64,

    /// 成功投递的处理器调用数
    pub delivered: u64,

    /// 处理器失败数（含超时与 panic）
    pub handler_failures: u64,

    /// 最后发布时间
    pub last_publish_at: Option<DateTime<Utc>>,
}

/// 事件总线配置
#[derive(Debug, Clone, Default)]
pub struct EventBusConfig {
    /// 单个处理器的执行超时（None 表示不限制）
    pub handler_timeout: Option<Duration>,
}

/// 事件总线
///
/// 模块生命周期事件的发布订阅核心。事件严格按发布顺序串行分发；
/// 同一事件的处理器按订阅先后顺序依次调用。使用 `Arc<RwLock>`
/// 保证线程安全，可以廉价克隆后在多处共享。
#[derive(Clone)]
pub struct EventBus {
    /// 订阅列表（按订阅顺序排列）
    subscriptions: Arc<RwLock<Vec<SubscriptionEntry>>>,

    /// 分发锁，保证总线级 FIFO
    dispatch_lock: Arc<Mutex<()>>,

    /// 分发统计
    stats: Arc<RwLock<DispatchStats>>,

    /// 配置
    config: EventBusConfig,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// 使用自定义配置创建事件总线
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            dispatch_lock: Arc::new(Mutex::new(())),
            stats: Arc::new(RwLock::new(DispatchStats::default())),
            config,
        }
    }

    /// 订阅事件
    ///
    /// # Arguments
    ///
    /// * `pattern` - 事件类型模式（`*` 匹配所有，`module.*` 逐段匹配）
    /// * `handler` - 事件处理器
    ///
    /// # Returns
    ///
    /// 返回订阅 ID，用于后续取消订阅
    pub async fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: EventHandler,
    ) -> SubscriptionId {
        let pattern = pattern.into();
        let entry = SubscriptionEntry {
            subscription_id: uuid::Uuid::new_v4().to_string(),
            pattern: pattern.clone(),
            handler,
            subscribed_at: Utc::now(),
        };
        let subscription_id = entry.subscription_id.clone();

        {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions.push(entry);
        }

        debug!(
            subscription_id = %subscription_id,
            pattern = %pattern,
            "事件订阅成功"
        );

        subscription_id
    }

    /// 订阅事件（同步处理器便捷形式）
    ///
    /// 将一个普通闭包包装为事件处理器。闭包中的 panic 会被总线捕获并隔离。
    pub async fn subscribe_fn<F>(&self, pattern: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| {
            f(event);
            futures::future::ready(Ok(())).boxed()
        });
        self.subscribe(pattern, handler).await
    }

    /// 取消订阅
    ///
    /// 幂等操作：订阅不存在时什么也不做。
    ///
    /// # Returns
    ///
    /// 如果确实移除了订阅返回 `true`
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.subscription_id != subscription_id);
        let removed = subscriptions.len() < before;

        if removed {
            debug!(subscription_id = %subscription_id, "取消订阅成功");
        }

        removed
    }

    /// 发布事件
    ///
    /// 事件在返回前已分发给所有匹配的处理器。处理器失败（返回错误、
    /// panic 或超时）不会中断其余处理器；每个失败会在本事件分发完成后
    /// 追加发布一个 `module.error` 事件，该错误路径不再递归处理失败。
    ///
    /// # Returns
    ///
    /// 返回匹配的处理器数量
    pub async fn publish(&self, event: Event) -> usize {
        // 分发锁保证事件按发布顺序串行处理
        let _guard = self.dispatch_lock.lock().await;

        trace!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "发布事件"
        );

        let (matched, failures) = self.dispatch(&event).await;

        // 处理器失败以 module.error 事件上报；此路径的失败只记录日志
        for failure in failures {
            let error_event = Event {
                event_id: uuid::Uuid::new_v4().to_string(),
                event_type: module_events::MODULE_ERROR.to_string(),
                module_name: event.module_name.clone(),
                payload: serde_json::json!({
                    "error_kind": "handler_failure",
                    "subscription_id": failure.subscription_id,
                    "pattern": failure.pattern,
                    "error": failure.reason,
                    "source_event_type": event.event_type,
                    "source_event_id": event.event_id,
                }),
                timestamp: Utc::now(),
            };
            let (_, nested) = self.dispatch(&error_event).await;
            for nested_failure in nested {
                warn!(
                    subscription_id = %nested_failure.subscription_id,
                    error = %nested_failure.reason,
                    "module.error 事件的处理器执行失败"
                );
            }
        }

        matched
    }

    /// 分发单个事件给所有匹配的处理器
    ///
    /// 处理器快照在调用前获取：分发过程中新增的订阅只对后续事件可见。
    async fn dispatch(&self, event: &Event) -> (usize, Vec<HandlerFailure>) {
        let matching: Vec<SubscriptionEntry> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| pattern_matches(&s.pattern, &event.event_type))
                .cloned()
                .collect()
        };

        let matched = matching.len();
        let mut failures = Vec::new();

        for entry in matching {
            match self.invoke_handler(&entry, event.clone()).await {
                Ok(()) => {
                    trace!(subscription_id = %entry.subscription_id, "事件处理成功");
                }
                Err(reason) => {
                    warn!(
                        subscription_id = %entry.subscription_id,
                        pattern = %entry.pattern,
                        error = %reason,
                        "事件处理失败"
                    );
                    failures.push(HandlerFailure {
                        subscription_id: entry.subscription_id.clone(),
                        pattern: entry.pattern.clone(),
                        reason,
                    });
                }
            }
        }

        // 更新统计
        {
            let mut stats = self.stats.write().await;
            stats.published += 1;
            stats.delivered += (matched - failures.len()) as u64;
            stats.handler_failures += failures.len() as u64;
            stats.last_publish_at = Some(Utc::now());
        }

        (matched, failures)
    }

    /// 调用单个处理器，捕获错误、panic 与超时
    async fn invoke_handler(
        &self,
        entry: &SubscriptionEntry,
        event: Event,
    ) -> std::result::Result<(), String> {
        let fut = AssertUnwindSafe((entry.handler)(event)).catch_unwind();

        let outcome = match self.config.handler_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(format!("处理器执行超时（{:?}）", timeout)),
            },
            None => fut.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("处理器 panic".to_string()),
        }
    }

    /// 获取订阅数量
    pub async fn subscription_count(&self) -> usize {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.len()
    }

    /// 检查是否有订阅者匹配指定的事件类型
    pub async fn has_subscribers(&self, event_type: &str) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .iter()
            .any(|s| pattern_matches(&s.pattern, event_type))
    }

    /// 获取分发统计信息
    pub async fn stats(&self) -> DispatchStats {
        self.stats.read().await.clone()
    }

    /// 重置统计信息
    pub async fn reset_stats(&self) {
        let mut stats = self.stats.write().await;
        *stats = DispatchStats::default();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use crate::utils::ModuleError;

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new();
        assert_eq!(bus.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();

        let sub_id = bus.subscribe_fn("module.loaded", |_| {}).await;
        assert_eq!(bus.subscription_count().await, 1);

        assert!(bus.unsubscribe(&sub_id).await);
        assert_eq!(bus.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub_id = bus.subscribe_fn("module.loaded", |_| {}).await;

        assert!(bus.unsubscribe(&sub_id).await);
        // 第二次取消订阅是空操作，不报错
        assert!(!bus.unsubscribe(&sub_id).await);
        assert!(!bus.unsubscribe("nonexistent").await);
    }

    #[tokio::test]
    async fn test_publish_event() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.subscribe_fn("module.loaded", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        let matched = bus
            .publish(Event::new("module.loaded", "cache", json!({})))
            .await;

        assert_eq!(matched, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let matched = bus
            .publish(Event::new("module.loaded", "cache", json!({})))
            .await;
        assert_eq!(matched, 0);
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.subscribe_fn("module.*", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(Event::new("module.loaded", "a", json!({}))).await;
        bus.publish(Event::new("module.started", "a", json!({}))).await;
        bus.publish(Event::new("config.changed", "a", json!({}))).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handlers_invoked_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order_clone = order.clone();
            bus.subscribe_fn("module.loaded", move |_| {
                order_clone.lock().unwrap().push(tag);
            })
            .await;
        }

        bus.publish(Event::new("module.loaded", "a", json!({}))).await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_handler_isolation_on_error() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        // 第一个处理器返回错误
        let failing: EventHandler = Arc::new(|_| {
            futures::future::ready(Err(ModuleError::Internal("boom".to_string()))).boxed()
        });
        bus.subscribe("module.started", failing).await;

        // 第二个处理器正常执行
        bus.subscribe_fn("module.started", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(Event::new("module.started", "a", json!({}))).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = bus.stats().await;
        assert_eq!(stats.handler_failures, 1);
    }

    #[tokio::test]
    async fn test_handler_isolation_on_panic() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.subscribe_fn("module.started", |_| {
            panic!("intentional panic for test");
        })
        .await;

        bus.subscribe_fn("module.started", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(Event::new("module.started", "a", json!({}))).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_publishes_error_event() {
        let bus = EventBus::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = errors.clone();

        let failing: EventHandler = Arc::new(|_| {
            futures::future::ready(Err(ModuleError::Internal("boom".to_string()))).boxed()
        });
        bus.subscribe("module.started", failing).await;

        bus.subscribe_fn(module_events::MODULE_ERROR, move |event| {
            assert_eq!(event.payload["error_kind"], "handler_failure");
            errors_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(Event::new("module.started", "a", json!({}))).await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_error_handler_does_not_recurse() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        // module.error 的处理器自身也失败，不应无限递归
        bus.subscribe_fn(module_events::MODULE_ERROR, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            panic!("error handler panics too");
        })
        .await;

        let failing: EventHandler = Arc::new(|_| {
            futures::future::ready(Err(ModuleError::Internal("boom".to_string()))).boxed()
        });
        bus.subscribe("module.started", failing).await;

        bus.publish(Event::new("module.started", "a", json!({}))).await;

        // module.error 只分发一次
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let bus = EventBus::with_config(EventBusConfig {
            handler_timeout: Some(Duration::from_millis(50)),
        });

        let slow: EventHandler = Arc::new(|_| {
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
            .boxed()
        });
        bus.subscribe("module.started", slow).await;

        bus.publish(Event::new("module.started", "a", json!({}))).await;

        let stats = bus.stats().await;
        assert_eq!(stats.handler_failures, 1);
    }

    #[tokio::test]
    async fn test_subscription_during_publish_sees_later_events_only() {
        let bus = EventBus::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let bus_clone = bus.clone();
        let late_calls_clone = late_calls.clone();
        let registering: EventHandler = Arc::new(move |_| {
            let bus = bus_clone.clone();
            let late_calls = late_calls_clone.clone();
            async move {
                let late_calls = late_calls.clone();
                bus.subscribe_fn("module.loaded", move |_| {
                    late_calls.fetch_add(1, Ordering::SeqCst);
                })
                .await;
                Ok(())
            }
            .boxed()
        });
        bus.subscribe("module.loaded", registering).await;

        // 第一次发布：新订阅在分发中注册，对本事件不可见
        bus.publish(Event::new("module.loaded", "a", json!({}))).await;
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        // 第二次发布：上一轮注册的订阅可见
        bus.publish(Event::new("module.loaded", "a", json!({}))).await;
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_has_subscribers() {
        let bus = EventBus::new();
        assert!(!bus.has_subscribers("module.loaded").await);

        bus.subscribe_fn("module.*", |_| {}).await;

        assert!(bus.has_subscribers("module.loaded").await);
        assert!(bus.has_subscribers("module.started").await);
        assert!(!bus.has_subscribers("config.changed").await);
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = EventBus::new();
        bus.subscribe_fn("module.loaded", |_| {}).await;

        for _ in 0..5 {
            bus.publish(Event::new("module.loaded", "a", json!({}))).await;
        }

        let stats = bus.stats().await;
        assert_eq!(stats.published, 5);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.handler_failures, 0);
        assert!(stats.last_publish_at.is_some());

        bus.reset_stats().await;
        assert_eq!(bus.stats().await.published, 0);
    }
}
