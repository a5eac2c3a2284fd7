use super::*;

fn slides(count: usize) -> Vec<Slide> {
    (0..count)
        .map(|index| Slide {
            index,
            title: format!("Title {index}"),
            body: format!("Body {index}"),
            narration: format!("Narration {index}"),
            image_prompt: None,
        })
        .collect()
}

#[test]
fn cue_count_matches_slide_count() {
    let durations = vec![Duration::from_millis(1_500); 4];
    let cues = build_cues(&slides(4), &durations).expect("cues");
    assert_eq!(cues.len(), 4);
}

#[test]
fn cue_starts_are_cumulative_durations() {
    let durations = [
        Duration::from_millis(2_250),
        Duration::from_millis(900),
        Duration::from_secs(4),
    ];
    let cues = build_cues(&slides(3), &durations).expect("cues");

    for (index, cue) in cues.iter().enumerate() {
        let expected: u64 = durations[..index]
            .iter()
            .map(|duration| duration.as_millis() as u64)
            .sum();
        assert_eq!(cue.start_ms, expected);
        assert_eq!(cue.slide_index, index);
    }
    assert_eq!(cues[2].end_ms, 7_150);
}

#[test]
fn cues_never_overlap_and_strictly_increase() {
    let durations: Vec<Duration> = (1..=30)
        .map(|n| Duration::from_micros(n * 123_457))
        .collect();
    let cues = build_cues(&slides(30), &durations).expect("cues");

    for pair in cues.windows(2) {
        assert!(pair[0].start_ms < pair[1].start_ms);
        assert!(pair[0].end_ms <= pair[1].start_ms);
        assert!(pair[0].start_ms < pair[0].end_ms);
    }
}

#[test]
fn mismatched_lengths_are_rejected() {
    let error = build_cues(&slides(3), &[Duration::from_secs(1)]).expect_err("mismatch");
    assert!(matches!(
        error,
        SubtitleError::LengthMismatch {
            slides: 3,
            durations: 1
        }
    ));
}

#[test]
fn zero_duration_is_rejected() {
    let durations = [Duration::from_secs(1), Duration::from_micros(400)];
    let error = build_cues(&slides(2), &durations).expect_err("zero");
    assert!(matches!(error, SubtitleError::ZeroDuration { index: 1 }));
}

#[test]
fn timestamps_are_formatted_for_webvtt() {
    assert_eq!(format_timestamp(0), "00:00:00.000");
    assert_eq!(format_timestamp(61_005), "00:01:01.005");
    assert_eq!(format_timestamp(3_723_456), "01:02:03.456");
}

#[test]
fn render_webvtt_emits_header_and_cues() {
    let mut slides = slides(2);
    slides[1].narration = "First line\n\n  second --> line ".to_string();
    let cues = build_cues(&slides, &[Duration::from_secs(2), Duration::from_millis(1_250)])
        .expect("cues");

    let vtt = render_webvtt(&cues);
    assert_eq!(
        vtt,
        "WEBVTT\n\
         \n1\n00:00:00.000 --> 00:00:02.000\nNarration 0\n\
         \n2\n00:00:02.000 --> 00:00:03.250\nFirst line\nsecond -> line\n"
    );
}

#[test]
fn write_webvtt_creates_file() {
    let dir = std::env::temp_dir().join(format!("slidecast-subtitle-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create dir");
    let path = dir.join("subtitles.vtt");

    let cues = build_cues(&slides(1), &[Duration::from_secs(3)]).expect("cues");
    write_webvtt(&path, &cues).expect("write");
    let contents = std::fs::read_to_string(&path).expect("read");
    assert!(contents.starts_with("WEBVTT\n"));

    std::fs::remove_dir_all(&dir).ok();
}
