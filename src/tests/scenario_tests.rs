// src/tests/scenario_tests.rs
//
// End-to-end timing scenarios. Windows are kept short but with wide
// margins so the assertions hold on slow CI machines.

use std::time::Duration;
use tokio::time;
use tracing_test::traced_test;

use crate::test_utils::{local_controller, policy_of, request_from};

#[tokio::test]
async fn five_per_second_end_to_end() {
    let controller = local_controller();
    let policy = policy_of(1_000, 5);
    let request = request_from("203.0.113.7");

    // Five instant calls: all admitted, remaining counts down to zero
    for expected_remaining in (0..5).rev() {
        let decision = controller.check(&request, &policy).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected_remaining);
    }

    // Sixth immediate call: rejected, retry in roughly one window
    let rejected = controller.check(&request, &policy).await.unwrap();
    assert!(!rejected.allowed);
    assert_eq!(rejected.remaining, 0);
    assert!(rejected.retry_after > Duration::from_millis(500));
    assert!(rejected.retry_after <= Duration::from_millis(1_000));

    // After a full window the quota is back
    time::sleep(Duration::from_millis(1_100)).await;
    let decision = controller.check(&request, &policy).await.unwrap();
    assert!(decision.allowed);

    controller.destroy();
}

#[tokio::test]
async fn the_window_slides_instead_of_snapping() {
    let controller = local_controller();
    let policy = policy_of(800, 2);
    let request = request_from("203.0.113.7");

    assert!(controller.check(&request, &policy).await.unwrap().allowed);
    assert!(controller.check(&request, &policy).await.unwrap().allowed);

    // Waiting less than the window does not help: both events are still
    // inside the trailing interval.
    time::sleep(Duration::from_millis(300)).await;
    let rejected = controller.check(&request, &policy).await.unwrap();
    assert!(!rejected.allowed);
    assert!(rejected.retry_after <= Duration::from_millis(800));

    // A full window after the first burst, the oldest events have aged out
    // and the next request is admitted again.
    time::sleep(Duration::from_millis(700)).await;
    let decision = controller.check(&request, &policy).await.unwrap();
    assert!(decision.allowed);

    controller.destroy();
}

#[tokio::test]
async fn backoff_escalates_across_repeated_window_violations() {
    let controller = local_controller();
    let policy = policy_of(200, 1);
    let request = request_from("203.0.113.7");

    assert!(controller.check(&request, &policy).await.unwrap().allowed);

    let mut penalties = Vec::new();
    for _ in 0..3 {
        let decision = controller.check(&request, &policy).await.unwrap();
        assert!(!decision.allowed);
        penalties.push(
            controller
                .violations()
                .record_violation("203.0.113.7", policy.window),
        );
    }

    assert_eq!(
        penalties,
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
        ]
    );

    // Quiet for more than ten base windows: the ledger starts over
    time::sleep(Duration::from_millis(2_100)).await;
    let penalty = controller
        .violations()
        .record_violation("203.0.113.7", policy.window);
    assert_eq!(penalty, Duration::from_millis(200));

    controller.destroy();
}

#[traced_test]
#[tokio::test]
async fn decisions_are_logged_with_structured_fields() {
    let controller = local_controller();
    let policy = policy_of(1_000, 1);
    let request = request_from("203.0.113.7");

    controller.check(&request, &policy).await.unwrap();

    assert!(logs_contain("Admission decision"));

    controller.destroy();
}
