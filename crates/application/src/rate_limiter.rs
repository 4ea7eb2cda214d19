use std::time::Duration;

use tokio::time::Instant;

/// 令牌桶限流器
///
/// 所有外发消息共用一个桶：长期平均速率为 `capacity / period`，
/// 允许最多 `capacity` 次的突发。只由分发队列的消费者任务持有，不需要加锁。
#[derive(Debug)]
pub struct TokenBucket {
    /// 桶容量（最大突发数）
    capacity: f64,
    /// 每秒补充的令牌数
    refill_per_sec: f64,
    /// 当前令牌数，始终在 [0, capacity] 内
    tokens: f64,
    /// 上次补充时间（单调时钟）
    last_refill: Instant,
}

impl TokenBucket {
    /// `capacity` 为 0 时按 1 处理，`period` 为 0 时按 1 毫秒处理
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let period = period.max(Duration::from_millis(1)).as_secs_f64();
        Self {
            capacity,
            refill_per_sec: capacity / period,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// 按经过的时间补充令牌
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// 立即尝试取一个令牌
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 取一个令牌，不足时挂起当前任务直到下一个令牌可用
    pub async fn acquire(&mut self) {
        loop {
            if self.try_acquire() {
                return;
            }
            tokio::time::sleep(self.time_until_next_token()).await;
        }
    }

    /// 距离下一个完整令牌还需等待的时间
    pub fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
    }

    /// 当前可用令牌数（会先补充）
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}
