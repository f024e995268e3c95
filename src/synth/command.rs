//! Synthesis through an external TTS program (piper by default).
//!
//! The program runs once per sentence: text goes to stdin, raw mono PCM comes
//! back on stdout. Running sentence by sentence is what makes the output
//! incremental.

use crate::audio::convert::{f32_from_le_bytes, i16_from_le_bytes};
use crate::config::SynthesisConfig;
use crate::error::{Result, SelspeakError};
use crate::pipeline::cancel::CancelToken;
use crate::synth::sentences::split_sentences;
use crate::synth::synthesizer::{
    ChunkStream, ComputeDevice, RawAudio, SynthesisParams, Synthesizer,
};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Raw PCM layout written by the synthesis program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PcmFormat {
    /// Signed 16-bit little endian.
    #[default]
    S16le,
    /// 32-bit float little endian.
    F32le,
}

/// Locate an executable the way the shell would.
///
/// Names containing a slash are checked as paths.
pub fn find_in_path(command: &str) -> Option<PathBuf> {
    if command.contains('/') {
        let path = PathBuf::from(command);
        return path.is_file().then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

/// Runs an external TTS command per sentence.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    command: String,
    args: Vec<String>,
    gpu_args: Vec<String>,
    sample_rate: u32,
    format: PcmFormat,
    max_chunk_chars: usize,
}

impl CommandSynthesizer {
    pub fn new(command: &str, args: Vec<String>, sample_rate: u32, format: PcmFormat) -> Self {
        Self {
            command: command.to_string(),
            args,
            gpu_args: Vec::new(),
            sample_rate,
            format,
            max_chunk_chars: crate::defaults::MAX_CHUNK_CHARS,
        }
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            gpu_args: config.gpu_args.clone(),
            sample_rate: config.sample_rate,
            format: config.sample_format,
            max_chunk_chars: config.max_chunk_chars,
        }
    }

    pub fn with_gpu_args(mut self, gpu_args: Vec<String>) -> Self {
        self.gpu_args = gpu_args;
        self
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self
    }

    /// Expand placeholders and append GPU arguments when running on the GPU.
    pub fn build_args(&self, params: &SynthesisParams) -> Vec<String> {
        let speed = if params.speed > 0.0 { params.speed } else { 1.0 };
        let device = match params.compute {
            ComputeDevice::Gpu => "cuda",
            ComputeDevice::Cpu | ComputeDevice::Auto => "cpu",
        };
        let substitute = |arg: &String| {
            arg.replace("{voice}", &params.voice)
                .replace("{speed}", &format!("{speed}"))
                .replace("{length_scale}", &format!("{:.3}", 1.0 / speed))
                .replace("{device}", device)
        };

        let mut args: Vec<String> = self.args.iter().map(&substitute).collect();
        if params.compute == ComputeDevice::Gpu {
            args.extend(self.gpu_args.iter().map(&substitute));
        }
        args
    }

    fn synthesize_sentence(
        &self,
        sentence: &str,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<RawAudio> {
        if cancel.is_cancelled() {
            return Err(SelspeakError::SynthesisCancelled);
        }
        tracing::debug!("{} {:?} <- {:?}", self.command, args, sentence);
        let mut child = Command::new(&self.command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SelspeakError::SynthesisEngineNotFound {
                        command: self.command.clone(),
                    }
                } else {
                    SelspeakError::Synthesis {
                        message: format!("Failed to run {}: {}", self.command, e),
                    }
                }
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| SelspeakError::Synthesis {
            message: format!("{}: stdin not captured", self.command),
        })?;
        let text = format!("{sentence}\n");
        // Write from a helper thread: the engine may fill stdout before reading all input.
        let writer = thread::spawn(move || stdin.write_all(text.as_bytes()));
        let stdout = child.stdout.take().map(read_all);
        let stderr = child.stderr.take().map(read_all);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    return Err(SelspeakError::Synthesis {
                        message: format!("Failed to wait for {}: {}", self.command, e),
                    });
                }
            }
            if cancel.is_cancelled() {
                tracing::debug!("cancelled; killing {}", self.command);
                if let Err(e) = child.kill() {
                    tracing::warn!("failed to kill {}: {e}", self.command);
                }
                if let Err(e) = child.wait() {
                    tracing::warn!("failed to reap {}: {e}", self.command);
                }
                return Err(SelspeakError::SynthesisCancelled);
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        };

        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!("{} closed stdin early", self.command);
            }
            Ok(Err(e)) => {
                return Err(SelspeakError::Synthesis {
                    message: format!("Failed to send text to {}: {}", self.command, e),
                });
            }
            Err(_) => {
                return Err(SelspeakError::Synthesis {
                    message: format!("stdin writer for {} panicked", self.command),
                });
            }
        }

        if !status.success() {
            return Err(SelspeakError::CommandFailed {
                command: self.command.clone(),
                status: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(match self.format {
            PcmFormat::S16le => RawAudio::I16(i16_from_le_bytes(&stdout)),
            PcmFormat::F32le => RawAudio::F32(f32_from_le_bytes(&stdout)),
        })
    }
}

fn read_all(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            tracing::debug!("reading engine output failed: {e}");
        }
        buf
    })
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        params: &SynthesisParams,
        cancel: &CancelToken,
    ) -> Result<ChunkStream<'a>> {
        if find_in_path(&self.command).is_none() {
            return Err(SelspeakError::SynthesisEngineNotFound {
                command: self.command.clone(),
            });
        }
        let args = self.build_args(params);
        let sentences = split_sentences(text, self.max_chunk_chars);
        tracing::debug!("{} sentence(s) to synthesize", sentences.len());

        let cancel = cancel.clone();
        Ok(Box::new(sentences.into_iter().map(move |sentence| {
            self.synthesize_sentence(&sentence, &args, &cancel)
        })))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.command
    }
}
