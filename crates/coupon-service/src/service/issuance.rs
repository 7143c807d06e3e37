//! 发放资格引擎
//!
//! 对每个入站触发事件按固定顺序求值，首个命中的规则短路返回：
//!
//! 1. 去重闸门 -> 2. 关键词匹配 -> 3. 冷却窗口 -> 4. 每日上限
//! -> 5. 有效券复用（含状态对账）-> 6. 新发放 -> 7. 通知
//!
//! 所有时间比较使用进入处理时捕获的同一个 `now`，保证冷却、上限、
//! 过期判断彼此一致。通知发送失败只记录日志，永不回滚发放决定。

use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::{info, instrument, warn};

use coupon_shared::config::CouponConfig;
use coupon_shared::error::Result;

use crate::codegen::CodeGenerator;
use crate::models::{Coupon, NewCoupon, TriggerEvent};
use crate::notification::NotificationSender;
use crate::repository::CouponRepository;

use super::dedup::DedupGate;

/// 冷却拒绝的用户告知文案
const NOTICE_COOLDOWN: &str = "优惠券发放过于频繁，请稍后再试";
/// 每日上限拒绝的用户告知文案
const NOTICE_DAILY_CAP: &str = "今日优惠券发放已达上限，请明天再来";

/// 单个触发事件的处理结果
///
/// 策略性拒绝（冷却、上限）与静默跳过（重复事件、非触发消息）
/// 都是预期结果，不以错误表达。
#[derive(Debug, Clone)]
pub enum IssuanceOutcome {
    /// 事件已处理过，静默跳过
    AlreadyProcessed,
    /// 消息文本不是触发关键词，静默跳过
    NotTriggered,
    /// 冷却窗口内，拒绝发放
    CooldownActive,
    /// 达到每日上限，拒绝发放
    DailyCapReached,
    /// 复用现有的可核销券
    Reused(Coupon),
    /// 新发放一张券
    Issued(Coupon),
}

impl IssuanceOutcome {
    /// 日志用的结果标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyProcessed => "ALREADY_PROCESSED",
            Self::NotTriggered => "NOT_TRIGGERED",
            Self::CooldownActive => "COOLDOWN_ACTIVE",
            Self::DailyCapReached => "DAILY_CAP_REACHED",
            Self::Reused(_) => "REUSED",
            Self::Issued(_) => "ISSUED",
        }
    }
}

/// 发放资格引擎
pub struct IssuanceService {
    coupons: Arc<dyn CouponRepository>,
    dedup: DedupGate,
    generator: CodeGenerator,
    notifier: Arc<dyn NotificationSender>,
    config: CouponConfig,
}

impl IssuanceService {
    pub fn new(
        coupons: Arc<dyn CouponRepository>,
        dedup: DedupGate,
        generator: CodeGenerator,
        notifier: Arc<dyn NotificationSender>,
        config: CouponConfig,
    ) -> Self {
        Self {
            coupons,
            dedup,
            generator,
            notifier,
            config,
        }
    }

    /// 处理一个入站触发事件
    #[instrument(skip(self, event), fields(event_id = %event.event_id, owner_id = %event.owner_id))]
    pub async fn handle_trigger(&self, event: &TriggerEvent) -> Result<IssuanceOutcome> {
        // 单一时间基准：本事件内的所有判定共用
        let now = Utc::now();

        // 1. 去重
        if !self.dedup.try_claim(&event.event_id, now).await? {
            return Ok(IssuanceOutcome::AlreadyProcessed);
        }

        // 2. 关键词匹配：绝大多数入站消息不是领券请求，静默跳过
        let text = event.text.trim();
        if !self.config.trigger_phrases.iter().any(|p| p == text) {
            return Ok(IssuanceOutcome::NotTriggered);
        }

        // 3. 冷却窗口：以最近一张券（不限状态）的发放时刻为准
        if let Some(recent) = self
            .coupons
            .find_most_recent_for_owner(&event.owner_id)
            .await?
        {
            if now - recent.issued_at < self.config.cooldown_window() {
                info!(
                    owner_id = %event.owner_id,
                    last_issued_at = %recent.issued_at,
                    "冷却窗口内，拒绝发放"
                );
                self.notify_notice(&event.owner_id, NOTICE_COOLDOWN).await;
                return Ok(IssuanceOutcome::CooldownActive);
            }
        }

        // 4. 每日上限：自本地自然日零点起计数
        if self.config.daily_cap_enabled() {
            let midnight = local_midnight(now);
            let issued_today = self
                .coupons
                .count_issued_since(&event.owner_id, midnight)
                .await?;
            if issued_today >= i64::from(self.config.daily_cap) {
                info!(
                    owner_id = %event.owner_id,
                    issued_today,
                    cap = self.config.daily_cap,
                    "达到每日上限，拒绝发放"
                );
                self.notify_notice(&event.owner_id, NOTICE_DAILY_CAP).await;
                return Ok(IssuanceOutcome::DailyCapReached);
            }
        }

        // 5. 复用：最近的有效券若仍可核销则原样回发，否则先对账再走新发放
        if let Some(active) = self.coupons.find_active_for_owner(&event.owner_id).await? {
            if active.is_redeemable(now) {
                info!(
                    owner_id = %event.owner_id,
                    coupon_id = active.id,
                    "复用现有优惠券"
                );
                self.notify_coupon(&event.owner_id, &active).await;
                return Ok(IssuanceOutcome::Reused(active));
            }
            if let Some(stale) = active.stale_status(now) {
                self.coupons.mark_status(active.id, stale).await?;
            }
        }

        // 6. 新发放
        let new_coupon = NewCoupon {
            code: self.generator.generate(),
            owner_id: event.owner_id.clone(),
            issued_at: now,
            expires_at: now + self.config.validity_window(),
            usage_limit: self.config.usage_limit,
        };
        let coupon = self.coupons.create(&new_coupon).await?;

        // 7. 通知：失败只记日志，券的存在以存储为准
        self.notify_coupon(&event.owner_id, &coupon).await;

        Ok(IssuanceOutcome::Issued(coupon))
    }

    async fn notify_coupon(&self, owner_id: &str, coupon: &Coupon) {
        if let Err(e) = self.notifier.send_coupon(owner_id, coupon).await {
            warn!(owner_id, coupon_id = coupon.id, error = %e, "优惠券通知发送失败");
        }
    }

    async fn notify_notice(&self, owner_id: &str, text: &str) {
        if let Err(e) = self.notifier.send_notice(owner_id, text).await {
            warn!(owner_id, error = %e, "文本通知发送失败");
        }
    }
}

/// 计算 `now` 所在本地自然日的零点（返回 UTC 时刻）
///
/// 极端时区折叠导致零点不存在时退化为 `now` 本身，
/// 此时当日计数为 0，上限检查放行。
fn local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_timezone(&Local)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::CouponStatus;
    use crate::notification::NotificationError;
    use crate::repository::{MockCouponRepository, MockProcessedEventRepository};

    /// 记录调用次数、可配置失败的测试发送器
    struct TestSender {
        fail: bool,
        sent: AtomicUsize,
    }

    impl TestSender {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                sent: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationSender for TestSender {
        async fn send_coupon(
            &self,
            _owner_id: &str,
            _coupon: &Coupon,
        ) -> std::result::Result<(), NotificationError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotificationError::Rejected(502))
            } else {
                Ok(())
            }
        }

        async fn send_notice(
            &self,
            _owner_id: &str,
            _text: &str,
        ) -> std::result::Result<(), NotificationError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotificationError::Rejected(502))
            } else {
                Ok(())
            }
        }
    }

    fn make_event(text: &str) -> TriggerEvent {
        TriggerEvent {
            event_id: "evt-001".to_string(),
            owner_id: "user-001".to_string(),
            text: text.to_string(),
        }
    }

    fn make_coupon(issued_ago: Duration, usage_count: i32, status: CouponStatus) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: 7,
            code: "ABCD2345".to_string(),
            owner_id: "user-001".to_string(),
            issued_at: now - issued_ago,
            expires_at: now - issued_ago + Duration::hours(72),
            usage_limit: 2,
            usage_count,
            status,
            last_used_at: None,
            created_at: now - issued_ago,
            updated_at: now - issued_ago,
        }
    }

    fn fresh_gate() -> MockProcessedEventRepository {
        let mut events = MockProcessedEventRepository::new();
        events.expect_exists().returning(|_| Ok(false));
        events.expect_insert().returning(|_, _| Ok(true));
        events
    }

    fn make_service(
        coupons: MockCouponRepository,
        events: MockProcessedEventRepository,
        sender: Arc<TestSender>,
        config: CouponConfig,
    ) -> IssuanceService {
        IssuanceService::new(
            Arc::new(coupons),
            DedupGate::new(Arc::new(events)),
            CodeGenerator::new(),
            sender,
            config,
        )
    }

    #[tokio::test]
    async fn test_duplicate_event_is_noop() {
        let mut events = MockProcessedEventRepository::new();
        events.expect_exists().returning(|_| Ok(true));
        events.expect_insert().never();

        let mut coupons = MockCouponRepository::new();
        // 重复事件不得触达任何券查询
        coupons.expect_find_most_recent_for_owner().never();
        coupons.expect_create().never();

        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, events, sender.clone(), CouponConfig::default());

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::AlreadyProcessed));
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_trigger_text_is_silent() {
        let mut coupons = MockCouponRepository::new();
        coupons.expect_find_most_recent_for_owner().never();
        coupons.expect_create().never();

        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender.clone(), CouponConfig::default());

        let outcome = service.handle_trigger(&make_event("你好")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::NotTriggered));
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cooldown_refusal() {
        let mut coupons = MockCouponRepository::new();
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::minutes(10), 0, CouponStatus::Active))));
        coupons.expect_create().never();

        let config = CouponConfig {
            cooldown_minutes: 60,
            ..Default::default()
        };
        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender.clone(), config);

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::CooldownActive));
        // 拒绝也要告知用户
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cooldown_elapsed_reissues() {
        let mut coupons = MockCouponRepository::new();
        // 上一张券发放于两倍冷却窗口之前，且已耗尽
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::minutes(120), 2, CouponStatus::Active))));
        coupons
            .expect_find_active_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::minutes(120), 2, CouponStatus::Active))));
        coupons
            .expect_mark_status()
            .withf(|id, status| *id == 7 && *status == CouponStatus::Consumed)
            .times(1)
            .returning(|_, _| Ok(()));
        coupons.expect_create().times(1).returning(|new| {
            let now = Utc::now();
            Ok(Coupon {
                id: 8,
                code: new.code.clone(),
                owner_id: new.owner_id.clone(),
                issued_at: new.issued_at,
                expires_at: new.expires_at,
                usage_limit: new.usage_limit,
                usage_count: 0,
                status: CouponStatus::Active,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            })
        });

        let config = CouponConfig {
            cooldown_minutes: 60,
            daily_cap: 0,
            ..Default::default()
        };
        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender.clone(), config);

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        // 旧券已耗尽：先对账为 CONSUMED，再发新券
        match outcome {
            IssuanceOutcome::Issued(coupon) => assert_eq!(coupon.id, 8),
            other => panic!("意外的处理结果: {:?}", other),
        }
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_daily_cap_refusal() {
        let mut coupons = MockCouponRepository::new();
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::hours(3), 2, CouponStatus::Consumed))));
        coupons.expect_count_issued_since().returning(|_, _| Ok(1));
        coupons.expect_find_active_for_owner().never();
        coupons.expect_create().never();

        let config = CouponConfig {
            cooldown_minutes: 60,
            daily_cap: 1,
            ..Default::default()
        };
        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender.clone(), config);

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::DailyCapReached));
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_daily_cap_disabled_skips_count() {
        let mut coupons = MockCouponRepository::new();
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(None));
        // cap=0 时不允许触发计数查询
        coupons.expect_count_issued_since().never();
        coupons.expect_find_active_for_owner().returning(|_| Ok(None));
        coupons.expect_create().times(1).returning(|new| {
            let now = Utc::now();
            Ok(Coupon {
                id: 9,
                code: new.code.clone(),
                owner_id: new.owner_id.clone(),
                issued_at: new.issued_at,
                expires_at: new.expires_at,
                usage_limit: new.usage_limit,
                usage_count: 0,
                status: CouponStatus::Active,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            })
        });

        let config = CouponConfig {
            daily_cap: 0,
            ..Default::default()
        };
        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender, config);

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::Issued(_)));
    }

    #[tokio::test]
    async fn test_reuse_existing_redeemable_coupon() {
        let mut coupons = MockCouponRepository::new();
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::hours(3), 1, CouponStatus::Active))));
        coupons.expect_count_issued_since().returning(|_, _| Ok(0));
        coupons
            .expect_find_active_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::hours(3), 1, CouponStatus::Active))));
        coupons.expect_mark_status().never();
        coupons.expect_create().never();

        let config = CouponConfig {
            cooldown_minutes: 60,
            daily_cap: 5,
            ..Default::default()
        };
        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender.clone(), config);

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        // 复用同一张券（同一个兑换码），不新发
        match outcome {
            IssuanceOutcome::Reused(coupon) => assert_eq!(coupon.code, "ABCD2345"),
            other => panic!("意外的处理结果: {:?}", other),
        }
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_active_coupon_reconciled_then_reissued() {
        let mut coupons = MockCouponRepository::new();
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::hours(100), 0, CouponStatus::Active))));
        coupons
            .expect_find_active_for_owner()
            .returning(|_| Ok(Some(make_coupon(Duration::hours(100), 0, CouponStatus::Active))));
        coupons
            .expect_mark_status()
            .withf(|id, status| *id == 7 && *status == CouponStatus::Expired)
            .times(1)
            .returning(|_, _| Ok(()));
        coupons.expect_create().times(1).returning(|new| {
            let now = Utc::now();
            Ok(Coupon {
                id: 10,
                code: new.code.clone(),
                owner_id: new.owner_id.clone(),
                issued_at: new.issued_at,
                expires_at: new.expires_at,
                usage_limit: new.usage_limit,
                usage_count: 0,
                status: CouponStatus::Active,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            })
        });

        let config = CouponConfig {
            cooldown_minutes: 60,
            daily_cap: 0,
            ..Default::default()
        };
        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender, config);

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::Issued(_)));
    }

    #[tokio::test]
    async fn test_notify_failure_does_not_roll_back_issuance() {
        let mut coupons = MockCouponRepository::new();
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(None));
        coupons.expect_count_issued_since().returning(|_, _| Ok(0));
        coupons.expect_find_active_for_owner().returning(|_| Ok(None));
        coupons.expect_create().times(1).returning(|new| {
            let now = Utc::now();
            Ok(Coupon {
                id: 11,
                code: new.code.clone(),
                owner_id: new.owner_id.clone(),
                issued_at: new.issued_at,
                expires_at: new.expires_at,
                usage_limit: new.usage_limit,
                usage_count: 0,
                status: CouponStatus::Active,
                last_used_at: None,
                created_at: now,
                updated_at: now,
            })
        });

        let sender = Arc::new(TestSender::new(true));
        let service = make_service(coupons, fresh_gate(), sender.clone(), CouponConfig::default());

        // 发送失败但发放结果不受影响
        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::Issued(_)));
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_coupon_fields_follow_config() {
        let mut coupons = MockCouponRepository::new();
        coupons
            .expect_find_most_recent_for_owner()
            .returning(|_| Ok(None));
        coupons.expect_count_issued_since().returning(|_, _| Ok(0));
        coupons.expect_find_active_for_owner().returning(|_| Ok(None));
        coupons
            .expect_create()
            .withf(|new| {
                new.usage_limit == 3
                    && new.expires_at - new.issued_at == Duration::hours(24)
                    && new.code.len() == 8
            })
            .times(1)
            .returning(|new| {
                let now = Utc::now();
                Ok(Coupon {
                    id: 12,
                    code: new.code.clone(),
                    owner_id: new.owner_id.clone(),
                    issued_at: new.issued_at,
                    expires_at: new.expires_at,
                    usage_limit: new.usage_limit,
                    usage_count: 0,
                    status: CouponStatus::Active,
                    last_used_at: None,
                    created_at: now,
                    updated_at: now,
                })
            });

        let config = CouponConfig {
            validity_hours: 24,
            usage_limit: 3,
            ..Default::default()
        };
        let sender = Arc::new(TestSender::new(false));
        let service = make_service(coupons, fresh_gate(), sender, config);

        let outcome = service.handle_trigger(&make_event("优惠券")).await.unwrap();
        assert!(matches!(outcome, IssuanceOutcome::Issued(_)));
    }

    #[test]
    fn test_local_midnight_bounds() {
        let now = Utc::now();
        let midnight = local_midnight(now);
        assert!(midnight <= now);
        // 考虑夏令时切换，本地零点距当前时刻不超过 25 小时
        assert!(now - midnight < Duration::hours(25));
    }

    #[test]
    fn test_outcome_kind_labels() {
        assert_eq!(IssuanceOutcome::AlreadyProcessed.kind(), "ALREADY_PROCESSED");
        assert_eq!(IssuanceOutcome::NotTriggered.kind(), "NOT_TRIGGERED");
        assert_eq!(IssuanceOutcome::CooldownActive.kind(), "COOLDOWN_ACTIVE");
        assert_eq!(IssuanceOutcome::DailyCapReached.kind(), "DAILY_CAP_REACHED");
    }
}
