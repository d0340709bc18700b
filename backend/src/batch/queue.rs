//! 工作队列
//!
//! 有序、互斥的待处理条目来源。`pull` 原子地取出队首，
//! 任意两次调用不会拿到同一个条目。

use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加到队尾
    pub fn enqueue<I: IntoIterator<Item = T>>(&self, items: I) {
        self.items.lock().extend(items);
    }

    /// 取出队首
    pub fn pull(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// 剩余条目数
    pub fn remaining(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// 取出所有尚未开始的条目（保持原顺序）
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// 放回队首，保持传入顺序（恢复时使用）
    pub fn requeue(&self, items: Vec<T>) {
        let mut queue = self.items.lock();
        for item in items.into_iter().rev() {
            queue.push_front(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_fifo_pull() {
        let queue = WorkQueue::new();
        queue.enqueue(vec![1, 2, 3]);
        assert_eq!(queue.remaining(), 3);
        assert_eq!(queue.pull(), Some(1));
        assert_eq!(queue.pull(), Some(2));
        assert_eq!(queue.remaining(), 1);
        assert_eq!(queue.pull(), Some(3));
        assert_eq!(queue.pull(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_and_requeue_preserve_order() {
        let queue = WorkQueue::new();
        queue.enqueue(vec!["a", "b", "c", "d"]);
        assert_eq!(queue.pull(), Some("a"));

        let drained = queue.drain();
        assert_eq!(drained, vec!["b", "c", "d"]);
        assert_eq!(queue.remaining(), 0);

        queue.enqueue(vec!["e"]);
        queue.requeue(drained);
        assert_eq!(queue.drain(), vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn test_concurrent_pull_no_duplicates() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue(0..1000);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut pulled = Vec::new();
                    while let Some(item) = queue.pull() {
                        pulled.push(item);
                    }
                    pulled
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for item in handle.join().unwrap() {
                assert!(seen.insert(item), "条目 {} 被重复取出", item);
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
