// tests/study_control.rs

use aslrun::engine::{parse_control_line, ControlSignal, StudyControl};

#[test]
fn control_lines_parse() {
    assert_eq!(
        parse_control_line("pause first"),
        Some((ControlSignal::Pause, "first".to_string()))
    );
    assert_eq!(
        parse_control_line("  STOP  my study \n"),
        Some((ControlSignal::Stop, "my study".to_string()))
    );
    assert_eq!(
        parse_control_line("resume b"),
        Some((ControlSignal::Resume, "b".to_string()))
    );
    assert_eq!(parse_control_line("stop"), None);
    assert_eq!(parse_control_line("kill first"), None);
    assert_eq!(parse_control_line(""), None);
}

#[tokio::test]
async fn signals_reach_every_subscribed_worker() {
    let control = StudyControl::new();
    assert_eq!(control.pause(), 0);

    let mut a = control.subscribe();
    let mut b = control.subscribe();
    assert_eq!(control.stop(), 2);
    assert_eq!(a.recv().await.ok(), Some(ControlSignal::Stop));
    assert_eq!(b.recv().await.ok(), Some(ControlSignal::Stop));

    let other = StudyControl::new();
    let mut c = other.subscribe();
    control.resume();
    assert!(c.try_recv().is_err());
}
