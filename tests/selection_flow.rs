//! Selection capture through normalization into a pipeline run.

use selspeak::audio::device::MockOutput;
use selspeak::error::SelspeakError;
use selspeak::pipeline::{CancelToken, Pipeline, PipelineConfig, RunOutcome};
use selspeak::selection::{
    MockCommandExecutor, SelectionSource, normalize_for_speech, read_selection,
};
use selspeak::synth::MockSynthesizer;
use std::sync::Arc;
use std::time::Duration;

fn speak_selection(executor: &MockCommandExecutor) -> (RunOutcome, MockSynthesizer, MockOutput) {
    let synth = MockSynthesizer::new(24000);
    let output = MockOutput::new();
    let pipeline = Pipeline::new(
        PipelineConfig {
            settle: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            ..PipelineConfig::default()
        },
        Arc::new(synth.clone()),
        Arc::new(output.clone()),
    );

    let raw = read_selection(executor, SelectionSource::Primary).unwrap();
    let outcome = match normalize_for_speech(&raw, true) {
        Some(text) => pipeline.run(&text, &CancelToken::new()).outcome,
        None => RunOutcome::NothingToSpeak,
    };
    (outcome, synth, output)
}

#[test]
fn wrapped_selection_is_spoken_sentence_by_sentence() {
    let executor = MockCommandExecutor::new().with_response(Ok(
        "The quick brown fox\njumps over the lazy dog.\n\nThe end.".to_string(),
    ));

    let (outcome, synth, output) = speak_selection(&executor);

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(synth.synthesize_calls(), 1);
    assert_eq!(output.written().len(), 2);
}

#[test]
fn empty_selection_opens_nothing() {
    let executor = MockCommandExecutor::new().with_response(Err(SelspeakError::CommandFailed {
        command: "wl-paste".to_string(),
        status: 1,
        stderr: "Nothing is copied".to_string(),
    }));

    let (outcome, synth, output) = speak_selection(&executor);

    assert_eq!(outcome, RunOutcome::NothingToSpeak);
    assert_eq!(synth.synthesize_calls(), 0);
    assert_eq!(output.opens(), 0);
}

#[test]
fn whitespace_selection_opens_nothing() {
    let executor = MockCommandExecutor::new().with_response(Ok("  \n\t\n ".to_string()));

    let (outcome, _synth, output) = speak_selection(&executor);

    assert_eq!(outcome, RunOutcome::NothingToSpeak);
    assert_eq!(output.opens(), 0);
}
