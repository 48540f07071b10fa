//! The per-turn pipeline.
//!
//! Drives one user utterance from audio bytes (or text) to a synthesized
//! reply: transcription, transfer routing, input moderation, token
//! streaming, sentence-by-sentence synthesis, output moderation, and the
//! final state commit. Cancellation is cooperative: the token is checked
//! between every await, and in-flight provider streams are dropped (which
//! aborts them) as soon as it fires.

use crate::session::Session;
use base64::Engine;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tandem_agents::{AgentManager, HandoffNote, TransferRouter};
use tandem_types::protocol::ServerEvent;
use tandem_types::VoiceProfile;
use tandem_voice::llm::DEFAULT_MAX_TOKENS;
use tandem_voice::{ProviderError, Verdict};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What started this turn.
#[derive(Debug)]
pub enum TurnInput {
    /// Raw PCM16LE 16 kHz mono utterance audio.
    Audio(Vec<u8>),
    /// Synthetic user turn; transcription is skipped.
    Text(String),
}

/// Phases of the turn state machine. Terminal phases are `Done`,
/// `Cancelled`, `Blocked`, and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Transcribing,
    Routing,
    ModeratingIn,
    Generating,
    Speaking,
    Done,
    Cancelled,
    Blocked,
    Failed,
}

/// Sentence punctuation that triggers a synthesis flush.
const SENTENCE_PUNCTUATION: [char; 3] = ['.', '?', '!'];

/// Soft limit after which a sentence is flushed even without punctuation.
pub const SENTENCE_SOFT_LIMIT: usize = 120;

/// Checkpoint preview length in the `checkpoint_saved` event.
const CHECKPOINT_PREVIEW_CHARS: usize = 120;

struct TurnCtx {
    session: Arc<Session>,
    turn_id: u64,
    cancel: CancellationToken,
    started: Instant,
    phase: TurnPhase,
}

impl TurnCtx {
    fn enter(&mut self, phase: TurnPhase) {
        tracing::debug!(
            session_id = %self.session.id,
            turn_id = self.turn_id,
            from = ?self.phase,
            to = ?phase,
            "turn phase"
        );
        self.phase = phase;
    }

    fn emit(&self, event: ServerEvent) {
        self.session.emit(event);
    }

    fn latency_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Terminal handling for an adapter failure: feed the breaker and
    /// surface a typed error event. The session stays open.
    fn fail(&mut self, err: &ProviderError) {
        self.enter(TurnPhase::Failed);
        self.session.breaker().record_failure();
        tracing::error!(
            session_id = %self.session.id,
            turn_id = self.turn_id,
            error = %err,
            "turn failed"
        );
        self.emit(ServerEvent::Error {
            message: "Sorry, something went wrong handling that. Please try again.".to_string(),
        });
    }

    /// Terminal handling for a cancellation: acknowledge the barge-in (if
    /// that is what cancelled us) only after all emission has stopped,
    /// then checkpoint the partial reply for the next turn's context.
    fn cancelled(&mut self, partial: &str) {
        self.enter(TurnPhase::Cancelled);
        if self.session.was_barged(self.turn_id) {
            self.emit(ServerEvent::BargeInAck {
                turn_id: self.turn_id,
            });
        }
        let partial = partial.trim();
        if !partial.is_empty() {
            self.session.save_checkpoint(partial);
            self.emit(ServerEvent::CheckpointSaved {
                partial: partial.chars().take(CHECKPOINT_PREVIEW_CHARS).collect(),
            });
        }
    }
}

/// Runs the full pipeline for one turn.
pub async fn run_turn(
    session: Arc<Session>,
    input: TurnInput,
    turn_id: u64,
    cancel: CancellationToken,
) {
    let mut ctx = TurnCtx {
        session,
        turn_id,
        cancel,
        started: Instant::now(),
        phase: TurnPhase::Idle,
    };

    if ctx.session.breaker().is_open() {
        ctx.enter(TurnPhase::Failed);
        ctx.emit(ServerEvent::Error {
            message: "We're having temporary difficulty reaching our speech services. \
                      Please try again in a moment."
                .to_string(),
        });
        return;
    }

    // ── Transcribing ─────────────────────────────────────────────────────
    let user_text = match input {
        TurnInput::Text(text) => {
            ctx.emit(ServerEvent::FinalTranscript {
                turn_id,
                text: text.clone(),
                latency_ms: ctx.latency_ms(),
            });
            text
        }
        TurnInput::Audio(pcm) => {
            ctx.enter(TurnPhase::Transcribing);
            ctx.emit(ServerEvent::SttProcessing { turn_id });
            match ctx.session.app.stt.transcribe(&pcm).await {
                Ok(Some(text)) => {
                    ctx.session.breaker().record_success();
                    ctx.emit(ServerEvent::FinalTranscript {
                        turn_id,
                        text: text.clone(),
                        latency_ms: ctx.latency_ms(),
                    });
                    text
                }
                Ok(None) => {
                    // Silence: no user turn, no user-visible failure.
                    ctx.enter(TurnPhase::Done);
                    return;
                }
                Err(ProviderError::InvalidInput(reason)) => {
                    tracing::debug!(
                        session_id = %ctx.session.id,
                        turn_id,
                        reason,
                        "dropping unusable audio turn"
                    );
                    ctx.enter(TurnPhase::Done);
                    return;
                }
                Err(err) => {
                    ctx.fail(&err);
                    return;
                }
            }
        }
    };

    if ctx.cancel.is_cancelled() {
        ctx.cancelled("");
        return;
    }

    // ── Routing ──────────────────────────────────────────────────────────
    ctx.enter(TurnPhase::Routing);
    let from_agent = ctx.session.current_agent();
    let mut handoff: Option<HandoffNote> = None;

    if let Some(target) = TransferRouter::new().detect(&user_text, from_agent) {
        tracing::info!(
            session_id = %ctx.session.id,
            turn_id,
            from = %from_agent,
            to = %target,
            "agent transfer"
        );
        ctx.emit(ServerEvent::AgentChange { agent: target });

        // The outgoing voice acknowledges before the new persona speaks.
        let ack = AgentManager::acknowledgement(target);
        let outgoing_voice = ctx.session.voice_for(from_agent);
        if let Err(err) =
            speak_span(&ctx.session, turn_id, ack, &outgoing_voice, &ctx.cancel).await
        {
            ctx.fail(&err);
            return;
        }

        // Note built from the pre-switch snapshot, carried for exactly
        // this turn's build_messages call.
        let snapshot = ctx.session.render_context();
        handoff = Some(AgentManager::handoff_note(&snapshot, &user_text, target));
        ctx.session.switch_agent(target);

        if ctx.cancel.is_cancelled() {
            ctx.cancelled("");
            return;
        }
    }

    // ── ModeratingIn ─────────────────────────────────────────────────────
    ctx.enter(TurnPhase::ModeratingIn);
    if let Verdict::Blocked { reason } = ctx.session.app.moderation.check(&user_text).await {
        ctx.enter(TurnPhase::Blocked);
        tracing::warn!(session_id = %ctx.session.id, turn_id, reason, "input blocked");
        ctx.emit(ServerEvent::GuardrailBlocked { reason });
        return;
    }

    if ctx.cancel.is_cancelled() {
        ctx.cancelled("");
        return;
    }

    // ── Generating ───────────────────────────────────────────────────────
    ctx.enter(TurnPhase::Generating);
    let resumed_partial = ctx.session.take_checkpoint();
    let messages =
        ctx.session
            .build_messages(&user_text, handoff.as_ref(), resumed_partial.as_deref());

    let mut tokens = match ctx.session.app.llm.stream(&messages, DEFAULT_MAX_TOKENS).await {
        Ok(stream) => stream,
        Err(err) => {
            ctx.fail(&err);
            return;
        }
    };

    // Sentences are synthesized by a dedicated speaker task while tokens
    // keep streaming; spans are queued in order so chunk emission stays
    // monotonic.
    let reply_voice = ctx.session.voice_for(ctx.session.current_agent());
    let tts_cancel = ctx.cancel.child_token();
    let (span_tx, span_rx) = mpsc::channel::<String>(8);
    let speaker = tokio::spawn(speak_sentences(
        ctx.session.clone(),
        turn_id,
        reply_voice,
        span_rx,
        tts_cancel.clone(),
    ));

    let mut reply = String::new();
    let mut sentence = String::new();
    let mut llm_failed = None;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                drop(tokens); // aborts the provider stream
                drop(span_tx);
                let _ = speaker.await;
                ctx.cancelled(&reply);
                return;
            }
            token = tokens.next() => match token {
                Some(Ok(token)) => {
                    ctx.emit(ServerEvent::LlmToken {
                        turn_id,
                        token: token.clone(),
                    });
                    reply.push_str(&token);
                    sentence.push_str(&token);
                    if sentence_ready(&sentence) {
                        let span = std::mem::take(&mut sentence);
                        if span_tx.send(span).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    llm_failed = Some(err);
                    break;
                }
                None => break,
            }
        }
    }
    drop(tokens);

    if ctx.cancel.is_cancelled() {
        drop(span_tx);
        let _ = speaker.await;
        ctx.cancelled(&reply);
        return;
    }

    if let Some(err) = llm_failed {
        tts_cancel.cancel();
        drop(span_tx);
        let _ = speaker.await;
        ctx.fail(&err);
        return;
    }

    // ── Output moderation over the full reply ────────────────────────────
    if let Verdict::Blocked { reason } = ctx.session.app.moderation.check(&reply).await {
        ctx.enter(TurnPhase::Blocked);
        tts_cancel.cancel();
        drop(span_tx);
        let _ = speaker.await;
        tracing::warn!(session_id = %ctx.session.id, turn_id, reason, "reply blocked");
        // Already-emitted audio is not recalled; `tts_done` is suppressed
        // and the blocked reply stays out of the state commit.
        ctx.emit(ServerEvent::GuardrailBlocked { reason });
        ctx.session.commit_user_only(&user_text);
        return;
    }

    // ── Speaking: flush the trailing sentence and drain synthesis ────────
    ctx.enter(TurnPhase::Speaking);
    if !sentence.trim().is_empty() {
        let _ = span_tx.send(std::mem::take(&mut sentence)).await;
    }
    drop(span_tx);
    match speaker.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            ctx.fail(&err);
            return;
        }
        Err(join_err) => {
            tracing::error!(
                session_id = %ctx.session.id,
                turn_id,
                error = %join_err,
                "speaker task panicked"
            );
            return;
        }
    }

    if ctx.cancel.is_cancelled() {
        ctx.cancelled(&reply);
        return;
    }

    ctx.session.breaker().record_success();
    ctx.emit(ServerEvent::TtsDone { turn_id });

    // ── Commit ───────────────────────────────────────────────────────────
    ctx.enter(TurnPhase::Done);
    if reply.trim().is_empty() {
        tracing::warn!(session_id = %ctx.session.id, turn_id, "empty reply, nothing to commit");
        return;
    }
    let state = ctx.session.commit_turn(&user_text, &reply);
    ctx.emit(ServerEvent::StateUpdate { state });
    tracing::info!(
        session_id = %ctx.session.id,
        turn_id,
        latency_ms = ctx.latency_ms(),
        reply_chars = reply.len(),
        "turn committed"
    );
}

/// Whether the sentence buffer should be flushed to synthesis.
///
/// Flushes on `.`, `?`, `!`, a newline, or the soft length limit.
fn sentence_ready(sentence: &str) -> bool {
    if sentence.trim().is_empty() {
        return false;
    }
    sentence.contains('\n')
        || sentence.trim_end().ends_with(SENTENCE_PUNCTUATION)
        || sentence.chars().count() >= SENTENCE_SOFT_LIMIT
}

/// Serially synthesizes queued sentence spans for one turn.
async fn speak_sentences(
    session: Arc<Session>,
    turn_id: u64,
    voice: VoiceProfile,
    mut spans: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<(), ProviderError> {
    loop {
        let span = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            span = spans.recv() => match span {
                Some(span) => span,
                None => return Ok(()),
            }
        };
        speak_span(&session, turn_id, &span, &voice, &cancel).await?;
    }
}

/// Synthesizes one span and forwards its audio chunks in order.
pub(crate) async fn speak_span(
    session: &Arc<Session>,
    turn_id: u64,
    text: &str,
    voice: &VoiceProfile,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let mut chunks = session.app.tts.synthesize(text, voice).await?;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()), // dropping aborts synthesis
            chunk = chunks.next() => match chunk {
                Some(Ok(chunk)) => {
                    session.emit(ServerEvent::TtsChunk {
                        turn_id,
                        audio: base64::engine::general_purpose::STANDARD.encode(&chunk),
                    });
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_flushes_on_terminators() {
        assert!(sentence_ready("That wall might be load-bearing."));
        assert!(sentence_ready("Really?"));
        assert!(sentence_ready("Go on!\n"));
        assert!(sentence_ready("First line\n"));
        assert!(!sentence_ready("halfway through a tho"));
        assert!(!sentence_ready("   "));
    }

    #[test]
    fn sentence_flushes_at_soft_limit() {
        let long = "word ".repeat(30); // 150 chars, no terminator
        assert!(sentence_ready(&long));
        let short = "word ".repeat(3);
        assert!(!sentence_ready(&short));
    }
}
