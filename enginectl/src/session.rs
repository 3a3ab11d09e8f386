//! Engine sessions driven from the command line.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use engine_bridge::{BridgeConfig, BridgeError, LineAssembler};
use engine_variants::{EngineVariant, VariantError, VariantRegistry};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Variant(#[from] VariantError),

    #[error("engine session failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to read script {}: {source}", path.display())]
    Script {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToEngine,
    FromEngine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub direction: Direction,
    pub line: String,
}

/// Everything exchanged with one engine, in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    pub variant: Option<EngineVariant>,
    pub entries: Vec<TranscriptEntry>,
    pub exit_code: Option<i32>,
}

impl Transcript {
    fn new(variant: EngineVariant) -> Self {
        Self {
            variant: Some(variant),
            ..Self::default()
        }
    }

    fn sent(&mut self, text: &str) {
        for line in text.lines() {
            self.entries.push(TranscriptEntry {
                direction: Direction::ToEngine,
                line: line.to_string(),
            });
        }
    }

    fn received(&mut self, line: String) {
        self.entries.push(TranscriptEntry {
            direction: Direction::FromEngine,
            line,
        });
    }

    /// Lines the engine printed.
    pub fn responses(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.direction == Direction::FromEngine)
            .map(|e| e.line.as_str())
    }

    pub fn render(&self, out: &mut impl Write) -> io::Result<()> {
        for entry in &self.entries {
            let arrow = match entry.direction {
                Direction::ToEngine => ">>",
                Direction::FromEngine => "<<",
            };
            writeln!(out, "{arrow} {}", entry.line)?;
        }
        if let Some(code) = self.exit_code {
            writeln!(out, "exit code: {code}")?;
        }
        Ok(())
    }
}

/// Mock engines for every variant, or only the linked ones.
pub fn registry(mock: bool) -> VariantRegistry {
    if mock {
        VariantRegistry::mock()
    } else {
        VariantRegistry::linked()
    }
}

pub fn render_list(registry: &VariantRegistry, out: &mut impl Write) -> io::Result<()> {
    for info in registry.describe() {
        let status = if info.available { "available" } else { "missing" };
        writeln!(
            out,
            "{:<10} {:<9} {:<5} {}",
            info.variant.name(),
            status,
            info.protocol,
            info.description
        )?;
    }
    Ok(())
}

/// Commands from a script file: one per line, blank lines and `#` comments skipped.
pub fn read_script(path: &Path) -> Result<Vec<String>, SessionError> {
    let text = std::fs::read_to_string(path).map_err(|source| SessionError::Script {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Start `variant`, complete its protocol handshake, and shut it down.
#[tracing::instrument(level = "info", skip(registry, config))]
pub fn handshake(
    registry: &VariantRegistry,
    variant: EngineVariant,
    config: BridgeConfig,
    timeout: Duration,
) -> Result<Transcript, SessionError> {
    let mut transcript = Transcript::new(variant);
    let mut bridge = registry.bridge(variant, config)?;
    bridge.start()?;

    transcript.sent(bridge.protocol().handshake_command());
    for line in bridge.handshake(timeout)? {
        transcript.received(line);
    }

    transcript.sent(bridge.protocol().quit_command());
    transcript.exit_code = Some(bridge.shutdown(timeout)?);
    Ok(transcript)
}

/// Send `commands` to `variant`, then quit, collecting every output line.
#[tracing::instrument(level = "info", skip(registry, config, commands))]
pub async fn run_commands(
    registry: &VariantRegistry,
    variant: EngineVariant,
    config: BridgeConfig,
    commands: &[String],
    timeout: Duration,
) -> Result<Transcript, SessionError> {
    let deadline = Instant::now() + timeout;
    let mut transcript = Transcript::new(variant);

    let mut bridge = registry.bridge(variant, config)?;
    // Start blocks until the engine has initialized, which can take seconds.
    let bridge = tokio::task::spawn_blocking(move || bridge.start().map(|()| bridge)).await??;
    let quit = bridge.protocol().quit_command().trim_end();
    let mut bridge = bridge.into_async()?;

    for command in commands {
        transcript.sent(command);
        bridge.send_command(command).await?;
        if command.trim() == quit {
            break;
        }
    }
    if !commands.iter().any(|c| c.trim() == quit) {
        transcript.sent(quit);
        bridge.send_command(quit).await?;
    }

    let mut lines = LineAssembler::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match bridge.recv_timeout(remaining).await? {
            Some(bytes) => lines.push(&bytes),
            None => break,
        }
    }
    while let Some(line) = lines.next_line() {
        transcript.received(line);
    }
    if let Some(partial) = lines.take_partial() {
        transcript.received(partial);
    }

    transcript.exit_code = Some(bridge.join().await?);
    tracing::info!("Session with {} finished with {:?}", variant, transcript.exit_code);
    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_bridge::{Engine, EngineIo};
    use engine_variants::MockEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_read_script_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.txt");
        std::fs::write(&path, "# warm up\nuci\n\n  isready  \ngo depth 1\n").unwrap();

        let commands = read_script(&path).unwrap();
        assert_eq!(commands, vec!["uci", "isready", "go depth 1"]);
    }

    #[test]
    fn test_read_script_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_script(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, SessionError::Script { .. }));
    }

    #[test]
    fn test_handshake_with_mock_engine() {
        let transcript = handshake(
            &registry(true),
            EngineVariant::Classical,
            BridgeConfig::default(),
            WAIT,
        )
        .unwrap();

        assert_eq!(transcript.exit_code, Some(0));
        assert_eq!(transcript.responses().last(), Some("uciok"));
        assert_eq!(transcript.entries[0].direction, Direction::ToEngine);
    }

    #[test]
    fn test_handshake_unavailable_variant() {
        let err = handshake(
            &VariantRegistry::empty(),
            EngineVariant::Sf16,
            BridgeConfig::default(),
            WAIT,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Variant(VariantError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_run_commands_appends_quit() {
        let commands = vec!["isready".to_string(), "go depth 1".to_string()];
        let transcript = run_commands(
            &registry(true),
            EngineVariant::Nnue,
            BridgeConfig::default(),
            &commands,
            WAIT,
        )
        .await
        .unwrap();

        let responses: Vec<&str> = transcript.responses().collect();
        assert!(responses.contains(&"readyok"));
        assert_eq!(responses.last(), Some(&"bestmove e2e4"));
        assert_eq!(transcript.entries.iter().filter(|e| e.line == "quit").count(), 1);
        assert_eq!(transcript.exit_code, Some(0));
    }

    /// Mock engine whose static initialization takes a while.
    struct SlowStartEngine(MockEngine);

    impl Engine for SlowStartEngine {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn initialize(&mut self) -> Result<(), String> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        }

        fn run(self: Box<Self>, io: EngineIo) -> i32 {
            Box::new(self.0).run(io)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_commands_does_not_block_the_runtime_while_starting() {
        let mut registry = VariantRegistry::empty();
        registry.register(EngineVariant::Classical, || {
            Box::new(SlowStartEngine(MockEngine::new(EngineVariant::Classical))) as Box<dyn Engine>
        });

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        let commands = vec!["isready".to_string()];
        let transcript = run_commands(
            &registry,
            EngineVariant::Classical,
            BridgeConfig::default(),
            &commands,
            WAIT,
        )
        .await
        .unwrap();
        ticker.abort();

        assert_eq!(transcript.exit_code, Some(0));
        assert!(transcript.responses().any(|line| line == "readyok"));
        assert!(ticks.load(Ordering::Relaxed) >= 5, "runtime stalled during start");
    }

    #[test]
    fn test_render_transcript() {
        let mut transcript = Transcript::new(EngineVariant::Fairy);
        transcript.sent("uci\n");
        transcript.received("uciok".to_string());
        transcript.exit_code = Some(0);

        let mut out = Vec::new();
        transcript.render(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">> uci\n<< uciok\nexit code: 0\n");
    }

    #[test]
    fn test_render_list_marks_missing() {
        let mut out = Vec::new();
        render_list(&VariantRegistry::empty(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().all(|l| l.contains("missing")));
    }
}
