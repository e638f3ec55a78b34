//! 观察者注册表
//!
//! 订阅者 key → 观察者。注册/注销来自应用线程，分发在控制器任务上进行；
//! 分发时先在锁内拍快照，释放锁之后再逐个回调，因此回调内部可以安全地
//! 修改注册表。

use crate::ble::observer::{CentralEvent, CentralObserver};
use log::trace;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct DelegateRegistry {
    observers: Arc<RwLock<HashMap<String, Arc<dyn CentralObserver>>>>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册观察者；相同 key 会覆盖旧的观察者
    pub fn register(&self, key: impl Into<String>, observer: Arc<dyn CentralObserver>) {
        let key = key.into();
        trace!("Registering observer '{}'", key);
        self.observers.write().insert(key, observer);
    }

    /// 注销观察者，key 不存在时什么也不做
    pub fn unregister(&self, key: &str) -> bool {
        trace!("Unregistering observer '{}'", key);
        self.observers.write().remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// 把事件分发给当前所有观察者，顺序不保证
    pub fn dispatch(&self, event: &CentralEvent) {
        let snapshot: Vec<Arc<dyn CentralObserver>> =
            self.observers.read().values().cloned().collect();

        trace!("Dispatching {:?} to {} observer(s)", event, snapshot.len());
        for observer in snapshot {
            event.deliver(observer.as_ref());
        }
    }
}

impl std::fmt::Debug for DelegateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let observers = self.observers.read();
        let mut keys: Vec<&String> = observers.keys().collect();
        keys.sort();
        f.debug_struct("DelegateRegistry")
            .field("keys", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::AdapterState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        states: AtomicUsize,
        timeouts: AtomicUsize,
    }

    impl CentralObserver for Counter {
        fn timeout(&self) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }

        fn state_changed(&self, _state: AdapterState) {
            self.states.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unregistered_observer_not_invoked() {
        let registry = DelegateRegistry::new();
        let counter = Arc::new(Counter::default());

        registry.register("a", counter.clone());
        assert!(registry.unregister("a"));
        registry.dispatch(&CentralEvent::Timeout);

        assert_eq!(counter.timeouts.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = DelegateRegistry::new();
        assert!(!registry.unregister("missing"));
        registry.register("a", Arc::new(Counter::default()));
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
    }

    #[test]
    fn test_reregister_keeps_latest() {
        let registry = DelegateRegistry::new();
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());

        registry.register("a", first.clone());
        registry.register("a", second.clone());
        registry.dispatch(&CentralEvent::Timeout);

        assert_eq!(registry.len(), 1);
        assert_eq!(first.timeouts.load(Ordering::SeqCst), 0);
        assert_eq!(second.timeouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_reaches_all() {
        let registry = DelegateRegistry::new();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        registry.register("a", a.clone());
        registry.register("b", b.clone());

        registry.dispatch(&CentralEvent::StateChanged {
            state: AdapterState::PoweredOn,
        });

        assert_eq!(a.states.load(Ordering::SeqCst), 1);
        assert_eq!(b.states.load(Ordering::SeqCst), 1);
    }

    /// 回调内部注销自己不会死锁，本次回调仍然完整送达
    #[test]
    fn test_observer_unregisters_itself_during_dispatch() {
        struct SelfRemoving {
            registry: DelegateRegistry,
            calls: AtomicUsize,
        }

        impl CentralObserver for SelfRemoving {
            fn timeout(&self) {
                self.registry.unregister("self");
                self.calls.fetch_add(1, Ordering::SeqCst);
            }
        }

        let registry = DelegateRegistry::new();
        let observer = Arc::new(SelfRemoving {
            registry: registry.clone(),
            calls: AtomicUsize::new(0),
        });
        registry.register("self", observer.clone());

        registry.dispatch(&CentralEvent::Timeout);
        registry.dispatch(&CentralEvent::Timeout);

        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_unregister_during_dispatch() {
        let registry = DelegateRegistry::new();
        let counter = Arc::new(Counter::default());

        let dispatcher = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    registry.dispatch(&CentralEvent::Timeout);
                }
            })
        };

        for _ in 0..1000 {
            registry.register("a", counter.clone());
            registry.unregister("a");
        }

        dispatcher.join().unwrap();
        assert!(registry.is_empty());
        assert!(counter.timeouts.load(Ordering::SeqCst) <= 1000);
    }
}
