//! Order acceptance façade over the engine.

mod common;

use common::*;
use portal_engine::{
    AcceptanceStatus, OrderAcceptRequest, OrderAcceptor, OrderRef, OrderStatusCheck,
    SimulatedBrowser,
};
use portal_types::{BrowserJobStatus, FailureReason, JobType, VendorPortalConfig};

fn request(portal: &VendorPortalConfig, order: OrderRef) -> OrderAcceptRequest {
    OrderAcceptRequest::new(portal.id.clone(), order, "coordinator@example.com")
}

#[tokio::test(start_paused = true)]
async fn mercury_acceptance_reports_portal_fee_and_due_date() {
    let browser = SimulatedBrowser::new()
        .with_text(".fee-amount", "$1,250.00")
        .with_text(".due-date", "2026-11-02")
        .with_text(".mn-status", "Accepted");
    let h = harness(browser).await;
    let portal = mercury(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());

    let result = acceptor
        .accept_order(
            &h.tenant,
            &request(&portal, OrderRef::by_id("MN-5001")).with_fee(900.0),
        )
        .await
        .unwrap();

    assert!(result.success, "{}", result.message);
    assert_eq!(result.status, AcceptanceStatus::Accepted);
    let details = result.order_details.unwrap();
    assert_eq!(details.order_id.as_deref(), Some("MN-5001"));
    assert_eq!(details.fee, Some(1250.0));
    assert_eq!(details.due_date.as_deref(), Some("2026-11-02"));
    assert_eq!(details.portal_status.as_deref(), Some("Accepted"));

    let job = h.engine.get_job(&h.tenant, &result.job_id).await.unwrap();
    assert_eq!(job.job_type, JobType::AcceptOrder);
    assert_eq!(job.parameters.get("fee").map(String::as_str), Some("900.00"));
    assert!(h
        .browser
        .calls_of("navigate")
        .iter()
        .any(|c| c.target == "https://www.mercurynetwork.com/mercury/orders/detail.aspx?id=MN-5001"));
}

#[tokio::test(start_paused = true)]
async fn requested_fee_is_used_when_the_portal_shows_none() {
    let h = harness(SimulatedBrowser::new()).await;
    let portal = valuetrac(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());

    let result = acceptor
        .accept_order(
            &h.tenant,
            &request(&portal, OrderRef::by_number("VT-5002"))
                .with_fee(475.0)
                .with_due_date("2026-11-09"),
        )
        .await
        .unwrap();
    let details = result.order_details.unwrap();
    assert_eq!(details.fee, Some(475.0));
    assert_eq!(details.due_date.as_deref(), Some("2026-11-09"));
    assert_eq!(details.order_number.as_deref(), Some("VT-5002"));
}

#[tokio::test(start_paused = true)]
async fn queueing_the_same_order_twice_reuses_the_job() {
    let h = harness(SimulatedBrowser::new()).await;
    let portal = valuetrac(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());
    let order = request(&portal, OrderRef::by_id("VT-5003"));

    let first = acceptor.queue_order_acceptance(&h.tenant, &order).await.unwrap();
    let second = acceptor.queue_order_acceptance(&h.tenant, &order).await.unwrap();
    assert!(!first.already_queued);
    assert!(!first.requires_approval);
    assert!(second.already_queued);
    assert_eq!(first.job_id, second.job_id);

    let immediate = acceptor.accept_order(&h.tenant, &order).await.unwrap();
    assert_eq!(immediate.status, AcceptanceStatus::AlreadyProcessing);
    assert_eq!(immediate.job_id, first.job_id);
    assert!(h.browser.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn order_reference_is_required() {
    let h = harness(SimulatedBrowser::new()).await;
    let portal = valuetrac(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());

    assert!(acceptor
        .accept_order(&h.tenant, &request(&portal, OrderRef::default()))
        .await
        .is_err());
    assert!(h.engine.list_jobs(&h.tenant, Default::default()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn batch_reports_each_order_separately() {
    let h = harness(SimulatedBrowser::new()).await;
    let portal = valuetrac(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());

    let batch = acceptor
        .batch_accept_orders(
            &h.tenant,
            &[
                request(&portal, OrderRef::by_id("VT-6001")),
                request(&portal, OrderRef::default()),
                request(&portal, OrderRef::by_id("VT-6002")),
            ],
        )
        .await;

    assert_eq!(batch.successful.len(), 2);
    assert_eq!(batch.failed.len(), 1);
    let failed = &batch.failed[0];
    assert!(failed.job_id.is_none());
    assert!(failed.message.contains("order"));
    assert_eq!(h.browser.sessions_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn acceptance_stats_count_outcomes_per_portal() {
    let browser = SimulatedBrowser::new().with_missing_selector(".btn-accept-order");
    let h = harness(browser).await;
    let valuetrac = valuetrac(&h).await;
    let mercury = mercury(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());

    let accepted = acceptor
        .accept_order(&h.tenant, &request(&valuetrac, OrderRef::by_id("VT-7001")))
        .await
        .unwrap();
    assert!(accepted.success);
    let failed = acceptor
        .accept_order(&h.tenant, &request(&mercury, OrderRef::by_id("MN-7002")))
        .await
        .unwrap();
    assert_eq!(failed.status, AcceptanceStatus::Failed);
    assert_eq!(failed.error.unwrap().reason, FailureReason::ElementNotFound);
    acceptor
        .queue_order_acceptance(&h.tenant, &request(&valuetrac, OrderRef::by_id("VT-7003")))
        .await
        .unwrap();

    let stats = acceptor.get_acceptance_stats(&h.tenant, None).await.unwrap();
    assert_eq!(stats.total_accepted, 1);
    assert_eq!(stats.total_failed, 1);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    assert!(stats.average_duration_ms > 0);
    assert_eq!(stats.by_portal[&valuetrac.id].accepted, 1);
    assert_eq!(stats.by_portal[&mercury.id].failed, 1);

    let other = portal_types::TenantId::new("tenant-other");
    let empty = acceptor.get_acceptance_stats(&other, Some(30)).await.unwrap();
    assert_eq!(empty.total_accepted + empty.total_failed, 0);
    assert_eq!(empty.success_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn status_check_normalizes_portal_text() {
    let browser = SimulatedBrowser::new().with_text(".vt-status", " In Progress ");
    let h = harness(browser).await;
    let portal = valuetrac(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());

    let check = acceptor
        .check_order_status(&h.tenant, &portal.id, &OrderRef::by_number("VT-8001"), "scheduler")
        .await
        .unwrap();
    match check {
        OrderStatusCheck::Resolved { raw, normalized, job_id, .. } => {
            assert_eq!(raw.trim(), "In Progress");
            assert_eq!(normalized.status, "in_progress");
            assert!(normalized.is_actionable);
            let job = h.engine.get_job(&h.tenant, &job_id).await.unwrap();
            assert_eq!(job.job_type, JobType::CheckStatus);
            assert_eq!(job.status, BrowserJobStatus::Completed);
        }
        other => panic!("unexpected status check outcome: {:?}", other),
    }
    assert!(h.browser.calls_of("click").iter().all(|c| !c.target.contains("accept")));
}

#[tokio::test(start_paused = true)]
async fn status_check_without_an_order_number_fails() {
    let h = harness(SimulatedBrowser::new()).await;
    let portal = valuetrac(&h).await;
    let acceptor = OrderAcceptor::new(h.engine.clone());

    // ValueTrac searches by order number; an id alone leaves the search box unresolved.
    let check = acceptor
        .check_order_status(&h.tenant, &portal.id, &OrderRef::by_id("VT-8002"), "scheduler")
        .await
        .unwrap();
    assert!(matches!(check, OrderStatusCheck::Failed { job_id: None, .. }));
    assert!(h.browser.calls().is_empty());
}
