use mtlink_mtproto::validator::{
    Admission, MAX_CONSECUTIVE_IGNORED, MsgIdValidator, RECENT_MSG_IDS, Rejection, STORED_MSG_IDS_MAX_SIZE,
};

const SECOND: i64 = 1 << 32;
const REF: i64 = 1_700_000_000 * SECOND;

fn server_id(offset_secs: i64) -> i64 {
    (REF + offset_secs * SECOND) | 1
}

fn never() -> i64 {
    panic!("no skew check expected")
}

fn rejected(a: Admission) -> Rejection {
    match a {
        Admission::Rejected { reason, .. } => reason,
        Admission::Accepted => panic!("expected a rejection"),
    }
}

#[test]
fn first_id_is_accepted_without_skew_check() {
    let mut v = MsgIdValidator::new();
    assert_eq!(v.admit(server_id(-10_000), never), Admission::Accepted);
    assert_eq!(v.stored(), &[server_id(-10_000)]);
}

#[test]
fn replays_are_rejected_without_touching_history() {
    let mut v = MsgIdValidator::new();
    v.admit(server_id(0), never);
    v.admit(server_id(1), || REF);
    let before = v.stored().to_vec();

    assert_eq!(rejected(v.admit(server_id(1), || REF)), Rejection::Duplicate);
    assert_eq!(rejected(v.admit(server_id(-1), || REF)), Rejection::BelowWindow);
    assert_eq!(v.stored(), &before[..]);
}

#[test]
fn history_stays_sorted() {
    let mut v = MsgIdValidator::new();
    for off in [0, 5, 3, 4, 1] {
        assert_eq!(v.admit(server_id(off), || REF), Admission::Accepted);
    }
    let ids = v.stored();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn skew_window_boundaries() {
    let mut v = MsgIdValidator::new();
    v.admit(server_id(-1000), never);

    assert!(matches!(rejected(v.admit(server_id(31), || REF)), Rejection::TooNew { .. }));
    assert!(matches!(rejected(v.admit(server_id(-301), || REF)), Rejection::TooOld { .. }));
    assert_eq!(v.admit(server_id(29), || REF), Admission::Accepted);
    assert_eq!(v.admit(server_id(-299), || REF), Admission::Accepted);
}

#[test]
fn oldest_half_is_pruned_past_the_limit() {
    let mut v = MsgIdValidator::new();
    let ids: Vec<i64> = (0..=STORED_MSG_IDS_MAX_SIZE as i64).map(|i| REF + i * 4 + 1).collect();
    for &id in &ids {
        assert_eq!(v.admit(id, || REF), Admission::Accepted);
    }
    assert_eq!(v.stored().len(), STORED_MSG_IDS_MAX_SIZE + 1);

    let next = REF + 100_000 + 1;
    assert_eq!(v.admit(next, || REF), Admission::Accepted);
    assert_eq!(v.stored().len(), STORED_MSG_IDS_MAX_SIZE / 2 + 2);

    let new_min = ids[STORED_MSG_IDS_MAX_SIZE / 2];
    assert_eq!(v.stored()[0], new_min);
    assert_eq!(rejected(v.admit(ids[10] + 2, || REF)), Rejection::BelowWindow);
}

#[test]
fn escalates_after_consecutive_rejections() {
    let mut v = MsgIdValidator::new();
    v.admit(server_id(0), never);

    for n in 1..MAX_CONSECUTIVE_IGNORED {
        let a = v.admit(server_id(0), || REF);
        assert_eq!(a, Admission::Rejected { reason: Rejection::Duplicate, escalate: false }, "at {n}");
    }
    let a = v.admit(server_id(0), || REF);
    assert_eq!(a, Admission::Rejected { reason: Rejection::Duplicate, escalate: true });

    assert_eq!(v.admit(server_id(1), || REF), Admission::Accepted);
    assert_eq!(v.ignored(), 0);
}

#[test]
fn ids_of_the_closed_connection_are_rejected_once() {
    let mut v = MsgIdValidator::new();
    for off in 0..40 {
        v.admit(server_id(off), || REF);
    }
    v.carry_over();
    v.clear_stored();
    assert_eq!(v.recent().len(), RECENT_MSG_IDS);
    assert_eq!(v.recent()[0], server_id(10));

    assert_eq!(rejected(v.admit(server_id(39), never)), Rejection::RecentlyClosed);
    assert_eq!(v.recent().len(), RECENT_MSG_IDS - 1);
    assert_eq!(v.admit(server_id(39), never), Admission::Accepted);
    assert_eq!(v.admit(server_id(40), || REF), Admission::Accepted);
}
