//! 付款成功私信通知
//!
//! 由同步的业务代码在订单完成后调用，经跨线程调用桥交给事件循环发送。
//! 机器人未运行时跳过并记录警告，不影响订单流程。

use domain::{DispatchPriority, MessagePayload, Recipient, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::bridge::Bridge;

/// 付款成功通知内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotice {
    pub order_no: String,
    pub points: i64,
    /// 付款金额（新台币，元）
    pub amount: i64,
    pub points_before: i64,
    pub points_after: i64,
}

impl PaymentNotice {
    pub fn render(&self) -> String {
        [
            "🎉 付款成功！".to_string(),
            String::new(),
            format!("訂單編號：{}", self.order_no),
            format!("購買點數：{} 點", self.points),
            format!("付款金額：NT$ {}", self.amount),
            String::new(),
            "💰 點數變化：".to_string(),
            format!("\u{3000}變更前：{} 點", self.points_before),
            format!("\u{3000}變更後：{} 點", self.points_after),
            String::new(),
            "感謝您的購買！".to_string(),
        ]
        .join("\n")
    }

    /// 消息载荷，附带订单号便于追踪
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload::text(self.render()).with("order_no", json!(self.order_no))
    }
}

/// 通知付款成功，返回是否已提交给事件循环
pub fn notify_payment_success(bridge: &Bridge, user: UserId, notice: &PaymentNotice) -> bool {
    let submitted = bridge.notify(
        Recipient::User(user),
        notice.to_payload(),
        DispatchPriority::Normal,
    );
    if submitted {
        info!(order_no = %notice.order_no, %user, "付款通知已提交");
    } else {
        warn!(order_no = %notice.order_no, %user, "机器人未运行，跳过付款通知");
    }
    submitted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> PaymentNotice {
        PaymentNotice {
            order_no: "PO-2024-0001".to_string(),
            points: 500,
            amount: 150,
            points_before: 20,
            points_after: 520,
        }
    }

    #[test]
    fn render_includes_order_and_point_changes() {
        let text = notice().render();
        assert!(text.starts_with("🎉 付款成功！"));
        assert!(text.contains("訂單編號：PO-2024-0001"));
        assert!(text.contains("購買點數：500 點"));
        assert!(text.contains("付款金額：NT$ 150"));
        assert!(text.contains("變更前：20 點"));
        assert!(text.contains("變更後：520 點"));
        assert!(text.ends_with("感謝您的購買！"));
    }

    #[test]
    fn payload_carries_order_number() {
        let payload = notice().to_payload();
        assert_eq!(payload.get("order_no"), Some(&json!("PO-2024-0001")));
        assert!(payload.content().is_some());
    }

    #[test]
    fn skipped_when_bot_is_not_running() {
        let bridge = Bridge::new();
        assert!(!notify_payment_success(&bridge, UserId::new(1), &notice()));
    }
}
