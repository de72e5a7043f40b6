use crate::deadline::Deadline;
use crate::error::{PopError, PushError};
use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// 固定容量的多生产者/多消费者队列
///
/// 基于 crossbeam 的 bounded channel，额外提供显式的 `close()`：
/// - 队列满时 `push` 阻塞，这是整个系统唯一的背压机制
/// - `try_pop` 永不阻塞，供每帧轮询的 owning thread 使用
/// - `pop` 阻塞等待 "有数据 或 已关闭"，worker 在 shutdown 时一定会被唤醒
/// - 关闭之后 `push` 失败；`pop` 会先取完剩余数据，然后返回 `Closed`
///
/// 同一个生产者的数据按 push 顺序交付；不同生产者之间没有顺序保证。
///
/// 所有 clone 共享同一个队列，最后一个 clone 被 drop 时队列销毁。
pub struct BoundedChannel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,

    closed: Arc<AtomicBool>,
    /// drop 掉这个 sender 会让 `close_rx` 断开，唤醒所有阻塞在 select 上的线程
    ///
    /// 入队持有读锁，`close` 持有写锁：`close` 返回之后不会再有数据进入队列。
    close_tx: Arc<RwLock<Option<Sender<()>>>>,
    close_rx: Receiver<()>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
            closed: self.closed.clone(),
            close_tx: self.close_tx.clone(),
            close_rx: self.close_rx.clone(),
        }
    }
}

// new & init
impl<T> BoundedChannel<T> {
    /// # Panics
    /// `capacity` 为 0 时 panic（0 容量会退化成 rendezvous channel）
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedChannel capacity must be non-zero");

        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let (close_tx, close_rx) = crossbeam_channel::bounded(0);

        Self {
            sender,
            receiver,
            capacity,
            closed: Arc::new(AtomicBool::new(false)),
            close_tx: Arc::new(RwLock::new(Some(close_tx))),
            close_rx,
        }
    }
}

// push
impl<T> BoundedChannel<T> {
    /// 阻塞入队，直到有空位或者队列被关闭
    #[inline]
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.push_deadline(item, Deadline::Forever)
    }

    /// 非阻塞入队
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let close_tx = self.close_tx.read().unwrap_or_else(PoisonError::into_inner);
        if close_tx.is_none() {
            return Err(PushError::Closed(item));
        }
        self.sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => PushError::Full(item),
            TrySendError::Disconnected(item) => PushError::Closed(item),
        })
    }

    /// 阻塞入队，最多等到 `deadline`
    ///
    /// select 只用来等待 "有空位 或 已关闭"，真正的入队总是走 `try_push`，
    /// 所以与 `close` 同时就绪时不会把数据放进已经关闭的队列。
    pub fn push_deadline(&self, item: T, deadline: Deadline) -> Result<(), PushError<T>> {
        let mut item = match self.try_push(item) {
            Ok(()) => return Ok(()),
            Err(PushError::Full(item)) => item,
            Err(e) => return Err(e),
        };

        let _span = tracy_client::span!("BoundedChannel::push_blocked");
        loop {
            let mut sel = Select::new();
            sel.send(&self.sender);
            sel.recv(&self.close_rx);
            match deadline.instant() {
                None => {
                    let _ = sel.ready();
                }
                Some(instant) => {
                    if sel.ready_deadline(instant).is_err() {
                        return Err(PushError::Timeout(item));
                    }
                }
            }

            // 空位可能被其他生产者抢走，继续等
            item = match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(item)) => item,
                Err(e) => return Err(e),
            };
        }
    }
}

// pop
impl<T> BoundedChannel<T> {
    /// 非阻塞出队；队列为空时返回 None
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// 阻塞出队，直到有数据、队列关闭并取空、或者超过 `deadline`
    pub fn pop(&self, deadline: Deadline) -> Result<T, PopError> {
        // 已经可见的数据直接取走，不进入 select
        match self.receiver.try_recv() {
            Ok(item) => return Ok(item),
            Err(TryRecvError::Disconnected) => return Err(PopError::Closed),
            Err(TryRecvError::Empty) => {}
        }
        if self.is_closed() {
            return self.receiver.try_recv().map_err(|_| PopError::Closed);
        }

        let mut sel = Select::new();
        let recv_index = sel.recv(&self.receiver);
        let close_index = sel.recv(&self.close_rx);

        let oper = match deadline.instant() {
            None => sel.select(),
            Some(instant) => match sel.select_deadline(instant) {
                Ok(oper) => oper,
                Err(_) => return Err(PopError::Timeout),
            },
        };

        match oper.index() {
            i if i == recv_index => oper.recv(&self.receiver).map_err(|_| PopError::Closed),
            i if i == close_index => {
                let _ = oper.recv(&self.close_rx);
                // close 与最后一次 push 可能同时发生
                self.receiver.try_recv().map_err(|_| PopError::Closed)
            }
            _ => unreachable!("select returned an operation that was never registered"),
        }
    }
}

// close
impl<T> BoundedChannel<T> {
    /// 关闭队列：之后的 push 全部失败，阻塞中的 push/pop 立即被唤醒
    pub fn close(&self) {
        let mut close_tx = self.close_tx.write().unwrap_or_else(PoisonError::into_inner);
        if close_tx.is_none() {
            return;
        }
        self.closed.store(true, Ordering::Release);
        drop(close_tx.take());
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// getters
impl<T> BoundedChannel<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
    #[inline]
    pub fn is_full(&self) -> bool {
        self.receiver.is_full()
    }
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_producer_keeps_push_order() {
        let channel = BoundedChannel::new(16);
        let producer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 1..=10 {
                    channel.push(i).unwrap();
                }
            })
        };
        producer.join().unwrap();

        let received: Vec<i32> = (0..10).map(|_| channel.pop(Deadline::Forever).unwrap()).collect();
        assert_eq!(received, (1..=10).collect::<Vec<_>>());
        assert!(channel.try_pop().is_none());
    }

    #[test]
    fn test_try_push_reports_full() {
        let channel = BoundedChannel::new(2);
        channel.try_push(1).unwrap();
        channel.try_push(2).unwrap();
        assert!(channel.is_full());

        let err = channel.try_push(3).unwrap_err();
        assert!(matches!(err, PushError::Full(3)));
        assert_eq!(err.into_inner(), 3);
    }

    #[test]
    fn test_push_blocks_until_slot_frees() {
        let channel = BoundedChannel::new(1);
        channel.push(0).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let channel = channel.clone();
            let pushed = pushed.clone();
            thread::spawn(move || {
                channel.push(1).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst), "push must block while the channel is saturated");

        assert_eq!(channel.try_pop(), Some(0));
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(channel.try_pop(), Some(1));
    }

    #[test]
    fn test_push_deadline_times_out() {
        let channel = BoundedChannel::new(1);
        channel.push("a").unwrap();
        let err = channel.push_deadline("b", Deadline::after(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(err, PushError::Timeout("b")));
    }

    #[test]
    fn test_pop_deadline_times_out() {
        let channel: BoundedChannel<u32> = BoundedChannel::new(4);
        let result = channel.pop(Deadline::after(Duration::from_millis(20)));
        assert_eq!(result, Err(PopError::Timeout));
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let channel: BoundedChannel<u32> = BoundedChannel::new(4);
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || channel.pop(Deadline::Forever))
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        channel.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), Err(PopError::Closed));
        }
    }

    #[test]
    fn test_close_wakes_blocked_producer_and_returns_item() {
        let channel = BoundedChannel::new(1);
        channel.push(7).unwrap();

        let producer = {
            let channel = channel.clone();
            thread::spawn(move || channel.push(8))
        };
        thread::sleep(Duration::from_millis(30));
        channel.close();

        let err = producer.join().unwrap().unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.into_inner(), 8);
    }

    /// 阻塞的 push 与 close、pop 同时发生：close 返回之后不会再有数据进入队列
    #[test]
    fn test_nothing_lands_after_close_returns() {
        for _ in 0..200 {
            let channel = BoundedChannel::new(1);
            channel.push(0).unwrap();

            let producer = {
                let channel = channel.clone();
                thread::spawn(move || channel.push(1))
            };
            let consumer = {
                let channel = channel.clone();
                thread::spawn(move || channel.try_pop())
            };
            channel.close();
            let mut drained: Vec<i32> = std::iter::from_fn(|| channel.try_pop()).collect();

            let pushed = producer.join().unwrap();
            drained.extend(consumer.join().unwrap());
            assert!(channel.try_pop().is_none(), "an item was pushed into a closed channel");
            assert_eq!(drained.contains(&1), pushed.is_ok());
        }
    }

    #[test]
    fn test_pop_drains_remaining_items_after_close() {
        let channel = BoundedChannel::new(4);
        channel.push(1).unwrap();
        channel.push(2).unwrap();
        channel.close();

        assert!(channel.push(3).unwrap_err().is_closed());
        assert_eq!(channel.pop(Deadline::Forever), Ok(1));
        assert_eq!(channel.pop(Deadline::Forever), Ok(2));
        assert_eq!(channel.pop(Deadline::Forever), Err(PopError::Closed));
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn test_zero_capacity_is_rejected() {
        let _ = BoundedChannel::<u8>::new(0);
    }

    /// 4 个生产者、3 个消费者：每个值恰好被取出一次，总数不变
    #[test]
    fn test_mpmc_stress_no_loss_no_duplicate() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;
        const CONSUMERS: usize = 3;

        let channel = BoundedChannel::new(8);
        let popped = Arc::new(AtomicUsize::new(0));

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let channel = channel.clone();
                let popped = popped.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(value) = channel.pop(Deadline::Forever) {
                        popped.fetch_add(1, Ordering::SeqCst);
                        seen.push(value);
                    }
                    seen
                })
            })
            .collect();

        crossbeam_utils::thread::scope(|s| {
            for p in 0..PRODUCERS {
                let channel = &channel;
                s.spawn(move |_| {
                    for i in 0..PER_PRODUCER {
                        channel.push(p * PER_PRODUCER + i).unwrap();
                    }
                });
            }
        })
        .unwrap();
        channel.close();

        let mut all = HashSet::new();
        let mut total = 0;
        for consumer in consumers {
            for value in consumer.join().unwrap() {
                assert!(all.insert(value), "value {value} delivered twice");
                total += 1;
            }
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
        assert_eq!(popped.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    }
}
