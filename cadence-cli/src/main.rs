//! `cadence`: segment WAV files into speech windows and align token peaks
//! into subtitles.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use cadence_core::{
    align, buffering::ChunkAssembler, segment_waveform, EngineConfig, EnergyScorer, FrameScorer,
    SpeechDetector, Subtitle, TimeWindow,
};
use serde::Deserialize;
use tracing::{info, warn};

const USAGE: &str = "Usage:
  cadence segment <file.wav> [--config <file.json>] [--chunk-frames <n>] [--online]
  cadence align <file.json>";

#[derive(Debug, PartialEq)]
enum Command {
    Segment(SegmentArgs),
    Align { input: PathBuf },
    Help,
}

#[derive(Debug, PartialEq)]
struct SegmentArgs {
    wav: PathBuf,
    config: Option<PathBuf>,
    chunk_frames: Option<usize>,
    online: bool,
}

/// Input document for `cadence align`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlignInput {
    peaks: Vec<f32>,
    tokens: Vec<String>,
    #[serde(default)]
    offset_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        eprintln!("cadence failed: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> anyhow::Result<()> {
    match parse_args(args)? {
        Command::Help => {
            println!("{USAGE}");
            Ok(())
        }
        Command::Segment(args) => segment(&args),
        Command::Align { input } => align_file(&input),
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter();
    let Some(command) = it.next() else {
        bail!("missing command\n{USAGE}");
    };

    match command.as_str() {
        "segment" => {
            let mut wav: Option<PathBuf> = None;
            let mut config: Option<PathBuf> = None;
            let mut chunk_frames: Option<usize> = None;
            let mut online = false;

            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--config" => {
                        let Some(v) = it.next() else {
                            bail!("missing value for --config");
                        };
                        config = Some(PathBuf::from(v));
                    }
                    "--chunk-frames" => {
                        let Some(v) = it.next() else {
                            bail!("missing value for --chunk-frames");
                        };
                        let n = v
                            .parse::<usize>()
                            .with_context(|| format!("invalid value for --chunk-frames: {v}"))?;
                        chunk_frames = Some(n);
                    }
                    "--online" => online = true,
                    "--help" | "-h" => return Ok(Command::Help),
                    other if other.starts_with("--") => bail!("unknown argument: {other}"),
                    other => {
                        if wav.is_some() {
                            bail!("unexpected extra input: {other}");
                        }
                        wav = Some(PathBuf::from(other));
                    }
                }
            }

            let Some(wav) = wav else {
                bail!("segment needs a WAV file\n{USAGE}");
            };
            Ok(Command::Segment(SegmentArgs {
                wav,
                config,
                chunk_frames,
                online,
            }))
        }
        "align" => {
            let Some(input) = it.next() else {
                bail!("align needs a JSON file\n{USAGE}");
            };
            if let Some(extra) = it.next() {
                bail!("unexpected argument: {extra}");
            }
            Ok(Command::Align {
                input: PathBuf::from(input),
            })
        }
        "--help" | "-h" | "help" => Ok(Command::Help),
        other => bail!("unknown command: {other}\n{USAGE}"),
    }
}

fn segment(args: &SegmentArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(n) = args.chunk_frames {
        config.chunk_frames = n;
    }
    config.validate()?;

    let (samples, sample_rate) = read_wav_mono_f32(&args.wav)
        .with_context(|| format!("reading {}", args.wav.display()))?;
    if sample_rate != config.vad.sample_rate {
        bail!(
            "{} is sampled at {sample_rate} Hz but the detector expects {} Hz",
            args.wav.display(),
            config.vad.sample_rate
        );
    }
    info!(
        file = %args.wav.display(),
        samples = samples.len(),
        chunk_frames = config.chunk_frames,
        online = args.online,
        "segmenting"
    );

    let mut scorer = EnergyScorer::from_config(&config.vad);
    let windows = if args.online {
        segment_online(&config, &mut scorer, &samples)?
    } else {
        segment_waveform(&config, &mut scorer, &samples)?
    };

    println!("{}", serde_json::to_string_pretty(&windows)?);
    Ok(())
}

/// Feed the detector chunk by chunk in online mode, so starts and ends are
/// reported as soon as they are confirmed. Each reported window is logged
/// at the chunk that produced it.
fn segment_online(
    config: &EngineConfig,
    scorer: &mut EnergyScorer,
    samples: &[f32],
) -> anyhow::Result<Vec<TimeWindow>> {
    let mut detector = SpeechDetector::new(config.vad.clone())?;
    let mut assembler = ChunkAssembler::new(&config.vad, config.chunk_frames);
    let max_end_silence_ms = config.vad.max_end_silence_ms;
    assembler.push(samples);

    let mut windows = Vec::new();
    let mut chunk_index = 0usize;
    while let Some((chunk, is_final)) = assembler.next_chunk_of_stream() {
        let emitted = match scorer.score(&chunk.samples) {
            Ok(scores) => detector.process(
                scores.view(),
                &chunk.samples,
                is_final,
                max_end_silence_ms,
                true,
            )?,
            Err(e) => {
                warn!(chunk = chunk_index, error = %e, "chunk could not be scored");
                detector.advance_unscored(&chunk.samples, is_final, max_end_silence_ms, true)
            }
        };
        for window in &emitted {
            info!(
                chunk = chunk_index,
                begin_ms = ?window.begin_ms,
                end_ms = ?window.end_ms,
                "window"
            );
        }
        windows.extend(emitted);
        chunk_index += 1;
    }
    Ok(windows)
}

fn align_file(path: &Path) -> anyhow::Result<()> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let subtitles = align_json(&raw)?;
    println!("{}", serde_json::to_string_pretty(&subtitles)?);
    Ok(())
}

fn align_json(raw: &str) -> anyhow::Result<Vec<Subtitle>> {
    let input: AlignInput = serde_json::from_str(raw).context("parsing alignment input")?;
    let subtitles = align(&input.peaks, &input.tokens, input.offset_ms)?;
    Ok(subtitles)
}

fn read_wav_mono_f32(path: &Path) -> anyhow::Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample <= 16 {
                reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| f32::from(v) / f32::from(i16::MAX)))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<Vec<_>, _>>()?
            }
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn segment_flags_are_parsed() {
        let cmd = parse_args(&args(&[
            "segment",
            "talk.wav",
            "--chunk-frames",
            "30",
            "--online",
            "--config",
            "vad.json",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Segment(SegmentArgs {
                wav: PathBuf::from("talk.wav"),
                config: Some(PathBuf::from("vad.json")),
                chunk_frames: Some(30),
                online: true,
            })
        );
    }

    #[test]
    fn segment_requires_a_file() {
        assert!(parse_args(&args(&["segment", "--online"])).is_err());
    }

    #[test]
    fn bad_chunk_frames_is_rejected() {
        assert!(parse_args(&args(&["segment", "a.wav", "--chunk-frames", "many"])).is_err());
        assert!(parse_args(&args(&["segment", "a.wav", "--chunk-frames"])).is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_args(&args(&["transcribe", "a.wav"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
    }

    #[test]
    fn align_takes_one_file() {
        assert_eq!(
            parse_args(&args(&["align", "peaks.json"])).unwrap(),
            Command::Align {
                input: PathBuf::from("peaks.json")
            }
        );
        assert!(parse_args(&args(&["align", "a.json", "b.json"])).is_err());
    }

    #[test]
    fn align_json_produces_subtitles() {
        let raw = r#"{ "peaks": [0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 0], "tokens": ["a", "b", "</s>"] }"#;
        let subtitles = align_json(raw).unwrap();
        assert_eq!(
            subtitles,
            vec![Subtitle {
                text: "ab".into(),
                begin_ms: 20,
                end_ms: 220,
            }]
        );
    }

    #[test]
    fn online_and_batch_agree_on_closed_windows() {
        let config = EngineConfig {
            chunk_frames: 25,
            ..EngineConfig::default()
        };
        let samples: Vec<f32> = (0..16_000)
            .map(|_| 0.0)
            .chain((0..32_000).map(|i| if i % 2 == 0 { 0.3 } else { -0.3 }))
            .chain((0..24_000).map(|_| 0.0))
            .collect();

        let mut scorer = EnergyScorer::from_config(&config.vad);
        let batch = segment_waveform(&config, &mut scorer, &samples).unwrap();
        let mut scorer = EnergyScorer::from_config(&config.vad);
        let online = segment_online(&config, &mut scorer, &samples).unwrap();

        let begins: Vec<_> = online.iter().filter_map(|w| w.begin_ms).collect();
        let ends: Vec<_> = online.iter().filter_map(|w| w.end_ms).collect();
        assert_eq!(begins, vec![720]);
        assert_eq!(ends, vec![3_160]);
        assert_eq!(batch, vec![TimeWindow::closed(720, 3_160)]);
    }
}
