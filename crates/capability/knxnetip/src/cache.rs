//! 组地址值缓存与订阅者

use domain::ValueChange;
use plc_telemetry::record_cache_update;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// 订阅过滤条件。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// `None` 表示所有地址
    pub addresses: Option<HashSet<u16>>,
    /// 只接收值发生变化的通知
    pub changes_only: bool,
}

impl SubscriptionFilter {
    fn matches(&self, change: &ValueChange) -> bool {
        self.addresses
            .as_ref()
            .is_none_or(|addresses| addresses.contains(&change.address))
            && (change.changed || !self.changes_only)
    }
}

struct Subscriber {
    id: u64,
    filter: SubscriptionFilter,
    sender: mpsc::Sender<ValueChange>,
}

/// 组地址 → 最近一次值。
///
/// 只有分发循环写入；读请求与订阅通知并发读取。
#[derive(Default)]
pub struct ValueCache {
    values: RwLock<HashMap<u16, Vec<u8>>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: u16) -> Option<Vec<u8>> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写入新值并通知所有订阅者。
    ///
    /// 字节相同则不更新缓存，`changed = false`；无旧值视为变化。
    /// 不论是否变化都会通知，由订阅者自行过滤。
    pub fn update(&self, address: u16, payload: Vec<u8>) -> ValueChange {
        let changed = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            match values.get(&address) {
                Some(previous) if *previous == payload => false,
                _ => {
                    values.insert(address, payload.clone());
                    true
                }
            }
        };
        if changed {
            record_cache_update();
        }
        let change = ValueChange {
            address,
            payload,
            changed,
        };
        debug!(target: "plc.knxnetip", address, changed, "value_cache_updated");
        self.notify(&change);
        change
    }

    /// 注册订阅者，返回订阅 id 与事件接收端。
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        capacity: usize,
    ) -> (u64, mpsc::Receiver<ValueChange>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, filter, sender });
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, change: &ValueChange) {
        let mut closed = Vec::new();
        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for subscriber in subscribers.iter() {
                if !subscriber.filter.matches(change) {
                    continue;
                }
                match subscriber.sender.try_send(change.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            target: "plc.knxnetip",
                            subscriber_id = subscriber.id,
                            "subscriber channel full, dropping value change"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }
        for id in closed {
            debug!(target: "plc.knxnetip", subscriber_id = id, "subscriber closed, removing");
            self.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_detection_compares_bytes() {
        let cache = ValueCache::new();
        let (_id, mut events) = cache.subscribe(SubscriptionFilter::default(), 8);

        assert!(cache.update(1, vec![0x01]).changed);
        assert!(!cache.update(1, vec![0x01]).changed);
        assert!(cache.update(1, vec![0x02]).changed);
        assert_eq!(cache.get(1), Some(vec![0x02]));

        let flags: Vec<bool> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|change| change.changed)
            .collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn filters_apply_per_subscriber() {
        let cache = ValueCache::new();
        let (_all, mut all) = cache.subscribe(SubscriptionFilter::default(), 8);
        let (_only, mut only) = cache.subscribe(
            SubscriptionFilter {
                addresses: Some(HashSet::from([7])),
                changes_only: true,
            },
            8,
        );

        cache.update(7, vec![1]);
        cache.update(7, vec![1]);
        cache.update(8, vec![1]);

        assert_eq!(std::iter::from_fn(|| all.try_recv().ok()).count(), 3);
        let received: Vec<ValueChange> = std::iter::from_fn(|| only.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![ValueChange {
                address: 7,
                payload: vec![1],
                changed: true
            }]
        );
    }

    #[test]
    fn dropped_receivers_are_removed() {
        let cache = ValueCache::new();
        let (id, events) = cache.subscribe(SubscriptionFilter::default(), 1);
        let (_other, _keep) = cache.subscribe(SubscriptionFilter::default(), 1);
        drop(events);

        cache.update(1, vec![0]);
        assert_eq!(cache.subscriber_count(), 1);
        assert!(!cache.unsubscribe(id));
    }
}
