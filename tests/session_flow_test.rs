//! 会话流程集成测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    use koala::capability::{CapabilityClient, CapabilityError, CapabilityId, MockBackend};
    use koala::config::AppConfig;
    use koala::coordinator::{
        Coordinator, CoordinatorEvent, SessionStatus, TurnIntent, TurnPayload, TurnRequest,
        TurnStatus,
    };
    use koala::reconcile::OfflineProgressEvent;
    use koala::store::Mood;

    fn turn(session_id: &str, counter: u64, intent: TurnIntent, payload: TurnPayload) -> TurnRequest {
        TurnRequest {
            session_id: session_id.to_string(),
            turn_counter: counter,
            intent,
            payload,
        }
    }

    fn first_success_payload() -> TurnPayload {
        TurnPayload {
            response_secs: 300,
            attempts: 2,
            completed: true,
            ..TurnPayload::default()
        }
    }

    #[tokio::test]
    async fn test_learn_turn_returns_content_and_encouraging_mood() {
        let (coordinator, _rx) = Coordinator::with_mocks(AppConfig::default());
        let session_id = coordinator
            .start_session("S1", "Mathematics", "Fractions")
            .await;

        let response = coordinator
            .turn(turn(&session_id, 1, TurnIntent::Learn, first_success_payload()))
            .await
            .unwrap();

        assert_eq!(response.status, TurnStatus::Completed);
        assert!(response.capabilities["content"]["body"].is_string());
        // 首次成功交互：情绪从默认 Happy 走到 Encouraging
        assert_eq!(response.mood, Some(Mood::Encouraging));
    }

    #[tokio::test]
    async fn test_content_timeout_turns_learn_into_retry() {
        let cfg = AppConfig::default();
        let mut capabilities = CapabilityClient::all_mock(cfg.capability.max_retries);
        capabilities.register(Arc::new(
            MockBackend::healthy(CapabilityId::Content)
                .with_failure(CapabilityError::Timeout(CapabilityId::Content)),
        ));
        let (coordinator, _rx) = Coordinator::new(cfg, capabilities);

        let session_id = coordinator
            .start_session("S1", "Mathematics", "Fractions")
            .await;
        let response = coordinator
            .turn(turn(&session_id, 1, TurnIntent::Learn, first_success_payload()))
            .await
            .unwrap();

        // 必需能力失败：结构化重试，不是缺一块的成功响应
        assert_eq!(response.status, TurnStatus::Retry);
        assert!(response.retry_hint.is_some());
        assert!(response.capabilities.is_empty());
        assert!(response.mood.is_none());
    }

    #[tokio::test]
    async fn test_turn_replay_is_idempotent() {
        let cfg = AppConfig::default();
        let mut capabilities = CapabilityClient::all_mock(cfg.capability.max_retries);
        capabilities.register(Arc::new(
            MockBackend::healthy(CapabilityId::Assessment).with_score(1.0),
        ));
        let (coordinator, mut notify_rx) = Coordinator::new(cfg, capabilities);

        let session_id = coordinator
            .start_session("S1", "Mathematics", "Fractions")
            .await;

        // 满分测评连打 5 回合，第 5 回合跨过精通线
        let mut last = None;
        for counter in 1..=5 {
            let response = coordinator
                .turn(turn(
                    &session_id,
                    counter,
                    TurnIntent::Assess,
                    TurnPayload {
                        completed: true,
                        attempts: 1,
                        ..TurnPayload::default()
                    },
                ))
                .await
                .unwrap();
            last = Some(response);
        }
        let committed = last.unwrap();
        assert!(committed
            .events
            .contains(&CoordinatorEvent::AchievementUnlocked {
                topic: "Fractions".to_string()
            }));

        // 原样重提第 5 回合：响应一字不差，事件不重复发射
        let replayed = coordinator
            .turn(turn(
                &session_id,
                5,
                TurnIntent::Assess,
                TurnPayload {
                    completed: true,
                    attempts: 1,
                    ..TurnPayload::default()
                },
            ))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&replayed).unwrap(),
            serde_json::to_value(&committed).unwrap()
        );

        let mut celebrations = 0;
        while let Ok(notification) = notify_rx.try_recv() {
            if notification.title == "Achievement unlocked" {
                celebrations += 1;
            }
        }
        assert_eq!(celebrations, 1);
    }

    #[tokio::test]
    async fn test_skill_levels_stay_in_unit_interval() {
        let cfg = AppConfig::default();
        let mut capabilities = CapabilityClient::all_mock(cfg.capability.max_retries);
        capabilities.register(Arc::new(
            MockBackend::healthy(CapabilityId::Assessment).with_score(1.0),
        ));
        let (coordinator, _rx) = Coordinator::new(cfg, capabilities);

        let session_id = coordinator
            .start_session("S1", "Mathematics", "Fractions")
            .await;
        for counter in 1..=10 {
            coordinator
                .turn(turn(
                    &session_id,
                    counter,
                    TurnIntent::Assess,
                    TurnPayload {
                        completed: true,
                        ..TurnPayload::default()
                    },
                ))
                .await
                .unwrap();

            let profile = coordinator.insights("S1").await.profile.unwrap();
            for skill in profile.skill_levels.values() {
                assert!((0.0..=1.0).contains(skill));
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_students_do_not_block_each_other() {
        let (coordinator, _rx) = Coordinator::with_mocks(AppConfig::default());
        let coordinator = Arc::new(coordinator);

        let a = coordinator
            .start_session("S1", "Mathematics", "Fractions")
            .await;
        let b = coordinator
            .start_session("S2", "Science", "Photosynthesis")
            .await;

        let ca = coordinator.clone();
        let cb = coordinator.clone();
        let ta = tokio::spawn(async move {
            ca.turn(turn(&a, 1, TurnIntent::Learn, first_success_payload()))
                .await
        });
        let tb = tokio::spawn(async move {
            cb.turn(turn(&b, 1, TurnIntent::Learn, first_success_payload()))
                .await
        });

        let (ra, rb) = tokio::join!(ta, tb);
        assert_eq!(ra.unwrap().unwrap().status, TurnStatus::Completed);
        assert_eq!(rb.unwrap().unwrap().status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_out_of_order_offline_events_supersede_the_straggler() {
        let (coordinator, _rx) = Coordinator::with_mocks(AppConfig::default());
        let t1 = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(100);
        let t2 = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(200);

        // 客户端先把 T2 报上来（第一次重连）
        let report = coordinator
            .reconcile_offline(
                "S1",
                vec![OfflineProgressEvent {
                    student_id: "S1".to_string(),
                    client_timestamp: t2,
                    payload: json!({ "topic": "Fractions", "score": 0.9 }),
                }],
            )
            .await;
        assert_eq!(report.applied.len(), 1);

        // 迟到的 T1：档案已推进到 T2，只能 Superseded
        let report = coordinator
            .reconcile_offline(
                "S1",
                vec![OfflineProgressEvent {
                    student_id: "S1".to_string(),
                    client_timestamp: t1,
                    payload: json!({ "topic": "Fractions", "score": 0.2 }),
                }],
            )
            .await;
        assert_eq!(report.superseded.len(), 1);
        assert!(report.applied.is_empty());

        let profile = coordinator.insights("S1").await.profile.unwrap();
        assert!(profile.skill("Fractions") > 0.2);
    }

    #[tokio::test]
    async fn test_full_session_lifecycle_with_summary() {
        let (coordinator, _rx) = Coordinator::with_mocks(AppConfig::default());
        let session_id = coordinator
            .start_session("S1", "Mathematics", "Fractions")
            .await;

        coordinator
            .turn(turn(&session_id, 1, TurnIntent::Learn, first_success_payload()))
            .await
            .unwrap();

        assert_eq!(
            coordinator.pause(&session_id).await.unwrap(),
            SessionStatus::Paused
        );
        assert_eq!(
            coordinator.resume(&session_id).await.unwrap(),
            SessionStatus::Active
        );

        coordinator
            .turn(turn(
                &session_id,
                2,
                TurnIntent::Assess,
                TurnPayload {
                    completed: true,
                    attempts: 1,
                    ..TurnPayload::default()
                },
            ))
            .await
            .unwrap();

        let summary = coordinator.end(&session_id).await.unwrap();
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.turns, 2);
        assert_eq!(summary.topics_touched, vec!["Fractions".to_string()]);
        assert!(summary.average_score.is_some());

        // 结束后的会话拒绝一切动作
        assert!(coordinator.resume(&session_id).await.is_err());
    }
}
