use std::collections::HashMap;
use std::io::Write;

use crossbeam_channel::Receiver;
use pmogrbl::{
    Axis, EventBus, GrblError, GrblSender, JogDirection, MemoryChannel, PlaybackState, Position,
    Program, SenderEvent, SenderOptions,
};

fn connected_sender() -> (GrblSender, MemoryChannel, Receiver<SenderEvent>) {
    let events = EventBus::new();
    let rx = events.subscribe();
    let link = MemoryChannel::open("mem");
    let mut sender = GrblSender::new(&SenderOptions::default(), events);
    sender.attach_channel(Box::new(link.clone()));
    (sender, link, rx)
}

fn numbered(n: usize) -> Program {
    Program::from_lines((0..n).map(|i| format!("G1 X{i}")))
}

fn log_lines(rx: &Receiver<SenderEvent>) -> Vec<String> {
    rx.try_iter()
        .filter_map(|e| match e {
            SenderEvent::LogLine(line) => Some(line),
            _ => None,
        })
        .collect()
}

#[test]
fn loading_a_file_drops_blank_lines_and_resets_the_stream() -> anyhow::Result<()> {
    let (mut sender, _link, rx) = connected_sender();
    sender.load_program(numbered(3));
    sender.play();

    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "G21\n\n  G0 X1 Y1  \n\t\nM5")?;
    let len = sender.load_file(file.path())?;

    assert_eq!(len, 3);
    assert_eq!(sender.program().line(1), Some("G0 X1 Y1"));
    assert_eq!(sender.machine().cursor(), 0);
    assert_eq!(sender.machine().last_sent(), None);
    assert_eq!(sender.playback_state(), PlaybackState::Idle);
    assert!(log_lines(&rx).contains(&"Loaded 3 lines".to_string()));
    Ok(())
}

#[test]
fn failed_load_keeps_current_program() -> anyhow::Result<()> {
    let (mut sender, _link, _rx) = connected_sender();
    sender.load_program(numbered(2));

    let dir = tempfile::tempdir()?;
    let err = sender.load_file(dir.path().join("missing.nc")).unwrap_err();

    assert!(matches!(err, GrblError::Load { .. }));
    assert_eq!(sender.program().len(), 2);
    Ok(())
}

#[test]
fn play_sends_first_line_then_one_per_notification() {
    let (mut sender, link, rx) = connected_sender();
    sender.load_program(numbered(4));

    sender.play();
    assert_eq!(link.lines(), vec!["G1 X0"]);

    sender.handle_data("ok\r\n");
    sender.handle_data("ok\r\n");
    assert_eq!(link.lines(), vec!["G1 X0", "G1 X1", "G1 X2"]);
    assert_eq!(sender.machine().cursor(), 3);
    assert_eq!(sender.machine().last_sent(), Some(2));

    let sent: Vec<_> = rx
        .try_iter()
        .filter_map(|e| match e {
            SenderEvent::LineSent { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![0, 1, 2]);
}

#[test]
fn stream_stops_at_the_end_of_the_program() {
    let (mut sender, link, _rx) = connected_sender();
    sender.load_program(numbered(2));
    sender.play();
    for _ in 0..5 {
        sender.handle_data("ok\r\n");
    }
    assert_eq!(link.lines().len(), 2);
    assert_eq!(sender.machine().cursor(), 2);
}

#[test]
fn pause_then_resume_sends_every_line_exactly_once() {
    let (mut sender, link, _rx) = connected_sender();
    sender.load_program(numbered(6));

    sender.play();
    sender.handle_data("ok\r\n");
    sender.pause();
    sender.handle_data("ok\r\n");
    sender.handle_data("<Idle|MPos:1.000,0.000,0.000|FS:0,0>\r\n");
    assert_eq!(link.lines().len(), 2);

    sender.resume();
    for _ in 0..10 {
        sender.handle_data("ok\r\n");
    }

    let expected: Vec<String> = numbered(6).lines().map(str::to_string).collect();
    assert_eq!(link.lines(), expected);
}

#[test]
fn play_on_empty_program_sends_nothing() {
    let (mut sender, link, _rx) = connected_sender();
    sender.play();
    assert!(link.frames().is_empty());
    assert_eq!(sender.playback_state(), PlaybackState::Idle);
}

#[test]
fn recovery_restarts_from_nearest_motion_line() {
    let (mut sender, link, rx) = connected_sender();
    sender.load_program(Program::from_lines(["G0 X10 Y0", "G0 X10 Y10", "G0 X20 Y10"]));

    let index = sender
        .recover_to_position(Position::new(10.0, 10.0, 0.0))
        .unwrap();

    assert_eq!(index, 1);
    assert_eq!(link.lines(), vec!["G0 X10 Y10"]);
    assert_eq!(sender.machine().cursor(), 2);
    assert_eq!(sender.playback_state(), PlaybackState::Playing);
    assert!(log_lines(&rx).contains(&"Recovering to line 1: G0 X10 Y10".to_string()));
}

#[test]
fn recovery_to_last_sent_replays_that_line() {
    let (mut sender, link, _rx) = connected_sender();
    sender.load_program(numbered(4));
    sender.play();
    sender.handle_data("ok\r\n");
    sender.pause();
    link.clear();

    assert_eq!(sender.recover_to_last_sent().unwrap(), 1);
    assert_eq!(link.lines(), vec!["G1 X1"]);
}

#[test]
fn recovery_failures_are_reported() {
    let (mut sender, link, rx) = connected_sender();
    sender.load_program(Program::from_lines(["G21", "M3 S1000"]));

    assert!(matches!(
        sender.recover_to_last_sent(),
        Err(GrblError::RecoveryUnavailable(_))
    ));
    assert!(sender.recover_to_position(Position::ORIGIN).is_err());
    assert!(link.frames().is_empty());

    let failures: Vec<_> = rx
        .try_iter()
        .filter_map(|e| match e {
            SenderEvent::RecoveryFailed(reason) => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        failures,
        vec![
            "No recovery point available.".to_string(),
            "No matching G-code line found for recovery.".to_string(),
        ]
    );
}

#[test]
fn settings_fetch_parses_dump_and_resumes_polling() {
    let (mut sender, link, rx) = connected_sender();
    sender.fetch_settings().unwrap();

    assert_eq!(link.lines(), vec!["$$"]);
    assert!(!sender.poller().is_enabled());

    assert!(sender.handle_data("$0=10\n").is_none());
    let snapshot = sender.handle_data("$1=25\nok\n").unwrap();

    assert!(sender.poller().is_enabled());
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get("$0").unwrap().description, "Step pulse time (μs)");
    assert_eq!(snapshot.get("$1").unwrap().value, "25");

    let fetched = rx.try_iter().find_map(|e| match e {
        SenderEvent::SettingsFetched(settings) => Some(settings),
        _ => None,
    });
    let keys: Vec<_> = fetched.unwrap().into_iter().map(|s| s.key).collect();
    assert_eq!(keys, vec!["$0", "$1"]);
}

#[test]
fn apply_sends_only_modified_settings() {
    let (mut sender, link, rx) = connected_sender();
    sender.fetch_settings().unwrap();
    sender.handle_data("$0=10\n$1=25\n$100=250.000\nok\n");
    link.clear();

    let edited = HashMap::from([
        ("$0".to_string(), "10".to_string()),
        ("$1".to_string(), "255".to_string()),
        ("$100".to_string(), "250.000".to_string()),
    ]);
    let sent = sender.apply_settings(&edited);

    assert_eq!(sent, vec!["$1=255"]);
    assert_eq!(link.lines(), vec!["$1=255"]);
    assert!(log_lines(&rx).contains(&"Sent modified GRBL settings.".to_string()));
}

#[test]
fn closed_link_reports_errors_but_keeps_the_cursor_moving() {
    let (mut sender, link, rx) = connected_sender();
    sender.load_program(numbered(3));
    link.set_open(false);

    sender.play();

    assert!(link.frames().is_empty());
    assert_eq!(sender.machine().cursor(), 1);
    let events: Vec<_> = rx.try_iter().collect();
    assert!(events.iter().any(|e| matches!(e, SenderEvent::LinkError(_))));
    assert!(!events.iter().any(|e| matches!(e, SenderEvent::LineSent { .. })));
}

#[test]
fn jog_stays_within_travel_limits() {
    let (mut sender, link, rx) = connected_sender();

    assert!(!sender.jog(Axis::Z, JogDirection::Negative));
    assert!(sender.jog(Axis::Z, JogDirection::Positive));
    assert!(sender.jog(Axis::X, JogDirection::Positive));

    assert_eq!(link.lines(), vec!["G91 G0 Z1", "G91 G0 X1"]);
    assert_eq!(sender.machine().position(), Position::new(1.0, 0.0, 1.0));

    let positions: Vec<_> = rx
        .try_iter()
        .filter_map(|e| match e {
            SenderEvent::PositionChanged(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(
        positions,
        vec![Position::new(0.0, 0.0, 1.0), Position::new(1.0, 0.0, 1.0)]
    );
}

#[test]
fn events_serialize_for_external_consumers() -> anyhow::Result<()> {
    let event = SenderEvent::LineSent {
        index: 3,
        text: "G0 X1".to_string(),
    };
    let json = serde_json::to_value(&event)?;
    assert_eq!(json["LineSent"]["index"], 3);
    assert_eq!(json["LineSent"]["text"], "G0 X1");
    Ok(())
}
