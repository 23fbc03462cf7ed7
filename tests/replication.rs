mod common;

use common::TestCluster;
use docket::cluster::{ClusterError, SlotUnavailable};
use docket::network::NewBooking;
use docket::store::StoreError;
use docket::{BookingStore, ReplicationEvent};

fn request() -> NewBooking {
    NewBooking {
        doctor_id: 7,
        patient_name: "Lin".to_string(),
        slot_time: "2024-06-03T14:00".to_string(),
    }
}

#[tokio::test]
async fn booking_reaches_reachable_peer_only() {
    let cluster = TestCluster::new(3).await;
    cluster.cut_off(3).await;

    let (booking, report) = cluster
        .node(1)
        .create_booking(request())
        .await
        .expect("local write succeeds");

    assert_eq!(report.delivered, vec![2]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 3);
    assert!(report.partial_failure().is_some());

    let origin = cluster.bookings_of(1).bookings().await.unwrap();
    assert_eq!(origin, vec![booking.clone()]);

    let replica = cluster.bookings_of(2).bookings().await.unwrap();
    assert_eq!(replica, vec![booking.clone()]);
    assert!(!cluster
        .bookings_of(2)
        .is_slot_available(7, "2024-06-03T14:00")
        .await
        .unwrap());

    assert!(cluster.bookings_of(3).bookings().await.unwrap().is_empty());
    assert!(cluster
        .bookings_of(3)
        .is_slot_available(7, "2024-06-03T14:00")
        .await
        .unwrap());
}

#[tokio::test]
async fn raw_replicate_with_unreachable_peer_returns_report() {
    let cluster = TestCluster::new(3).await;
    cluster.cut_off(2).await;

    let (booking, _) = cluster.node(1).create_booking(request()).await.unwrap();
    let report = cluster
        .node(1)
        .replicate(ReplicationEvent::BookingCreated(booking))
        .await;

    assert_eq!(report.delivered, vec![3]);
    assert_eq!(report.failed.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![2]);
    // Node 3 got the booking twice: once from create_booking, once here.
    assert_eq!(cluster.bookings_of(3).bookings().await.unwrap().len(), 2);
}

#[tokio::test]
async fn local_write_failure_is_surfaced_and_nothing_is_sent() {
    let cluster = TestCluster::new(2).await;
    cluster.bookings_of(1).set_offline(true).await;

    let err = cluster.node(1).create_booking(request()).await.unwrap_err();
    assert!(matches!(
        err,
        ClusterError::Store(StoreError::Unavailable(_))
    ));
    assert!(cluster.bookings_of(2).bookings().await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_event_counts_as_failed_delivery() {
    let cluster = TestCluster::new(2).await;
    cluster.bookings_of(2).set_offline(true).await;

    let report = cluster
        .node(1)
        .mark_slot_unavailable(SlotUnavailable {
            doctor_id: 1,
            slot_time: "09:00".to_string(),
        })
        .await
        .expect("local write succeeds");

    assert!(report.delivered.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(!cluster
        .bookings_of(1)
        .is_slot_available(1, "09:00")
        .await
        .unwrap());
}

#[tokio::test]
async fn slot_update_replicates_to_all_peers() {
    let cluster = TestCluster::new(3).await;
    let report = cluster
        .node(2)
        .mark_slot_unavailable(SlotUnavailable {
            doctor_id: 5,
            slot_time: "11:15".to_string(),
        })
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.delivered, vec![1, 3]);
    for id in 1..=3 {
        assert!(!cluster
            .bookings_of(id)
            .is_slot_available(5, "11:15")
            .await
            .unwrap());
    }
}
