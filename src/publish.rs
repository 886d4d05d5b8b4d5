use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;

use crate::model::Event;
use crate::proto::Outbound;

/// 事件发布端：有界队列，满时丢弃整批并计数，从不阻塞上报处理。
#[derive(Clone)]
pub struct EventPublisher {
    tx: SyncSender<Vec<Event>>,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    pub fn new(tx: SyncSender<Vec<Event>>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 投递一批事件；返回是否入队。
    pub fn publish(&self, events: Vec<Event>) -> bool {
        if events.is_empty() {
            return true;
        }
        match self.tx.try_send(events) {
            Ok(()) => true,
            Err(TrySendError::Full(events)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "Event queue full, dropped batch of {} event(s) ({} batch(es) dropped so far)",
                    events.len(),
                    total
                );
                false
            }
            Err(TrySendError::Disconnected(events)) => {
                log::warn!("Event publisher closed, {} event(s) lost", events.len());
                false
            }
        }
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// 转发线程：把事件批次写到出站链路，所有发布端关闭后退出。
pub fn spawn_event_forwarder(
    rx: Receiver<Vec<Event>>,
    outbound_tx: SyncSender<Outbound>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(events) = rx.recv() {
            if outbound_tx.send(Outbound::Events { events }).is_err() {
                log::warn!("Outbound link closed, stopping event forwarder");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArrivedEvent;
    use std::sync::mpsc;

    fn batch() -> Vec<Event> {
        vec![Event::Arrived(ArrivedEvent {
            epc: "01".into(),
            tid: String::new(),
            timestamp: 1,
            location: "R1_1".into(),
        })]
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (tx, rx) = mpsc::sync_channel(1);
        let publisher = EventPublisher::new(tx);
        assert!(publisher.publish(batch()));
        assert!(!publisher.publish(batch()));
        assert!(!publisher.publish(batch()));
        assert_eq!(publisher.dropped_batches(), 2);
        assert_eq!(rx.recv().unwrap().len(), 1);
        assert!(publisher.publish(batch()));
    }

    #[test]
    fn empty_batches_are_not_queued() {
        let (tx, rx) = mpsc::sync_channel(1);
        let publisher = EventPublisher::new(tx);
        assert!(publisher.publish(Vec::new()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forwarder_wraps_batches() {
        let (tx, rx) = mpsc::sync_channel(4);
        let (out_tx, out_rx) = mpsc::sync_channel(4);
        let handle = spawn_event_forwarder(rx, out_tx);
        tx.send(batch()).unwrap();
        drop(tx);
        handle.join().unwrap();
        assert_eq!(out_rx.recv().unwrap(), Outbound::Events { events: batch() });
    }
}
