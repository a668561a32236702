//! 回收任务：进程崩溃或请求被中断后残留的 `pending` 预留，超时后统一释放。

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::relay::billing::BillingLedger;
use crate::relay::error::RelayError;

#[derive(Clone)]
pub struct RecoverySweeper {
    ledger: BillingLedger,
    reservation_timeout: Duration,
    interval: Duration,
}

impl RecoverySweeper {
    pub fn new(ledger: BillingLedger, reservation_timeout: Duration, interval: Duration) -> Self {
        Self {
            ledger,
            reservation_timeout,
            interval,
        }
    }

    /// 执行一轮回收，返回释放的预留数量
    pub async fn run_once(&self) -> Result<usize, RelayError> {
        let released = self.ledger.release_expired(self.reservation_timeout).await?;
        if released > 0 {
            info!(released = released, timeout_secs = self.reservation_timeout.as_secs(), "Expired reservations released");
        }
        Ok(released)
    }

    /// 在后台按固定间隔运行
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Recovery sweeper started");

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Recovery sweep failed");
                }
            }
        })
    }
}
