//! Process-based radiative transfer engine.
//!
//! The engine is any executable speaking this protocol:
//!
//! ```text
//! <command> [args..] abundances --lines <csv> --teff T --logg G --mh M --xi X
//! <command> [args..] synthesise --lines <csv> --teff T --logg G --mh M [--xi X]
//!                               --start A --end B --step S
//! ```
//!
//! The line list is staged as a transition-table CSV in a temporary file.
//! `abundances` prints one abundance per line (input order); `synthesise`
//! prints `dispersion flux` pairs. A configurable exit code (default 2)
//! reports parameters outside the engine's photosphere grid.
//!
//! Calls block with an explicit timeout and can be cancelled through a shared
//! [`CancellationToken`]. A timed-out or cancelled engine is killed.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::AtomicTransition;
use crate::io::table::write_transitions;
use crate::physics::{AbundanceEvaluator, EvaluatorError, Photosphere, SyntheticSpectrum, Synthesiser};

/// Environment variable naming the engine when the configuration does not.
pub const ENGINE_ENV: &str = "EQUILIBRIA_ENGINE";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest accepted engine call, in seconds (one day).
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable. Falls back to `$EQUILIBRIA_ENGINE`.
    pub command: Option<PathBuf>,
    /// Arguments placed before the mode (e.g. a script path).
    pub args: Vec<String>,
    pub timeout_secs: f64,
    pub out_of_grid_exit_code: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: 300.0,
            out_of_grid_exit_code: 2,
        }
    }
}

impl EngineConfig {
    /// The configured command, or the one named in the environment (`.env` honoured).
    pub fn resolve_command(&self) -> Result<PathBuf, EvaluatorError> {
        if let Some(cmd) = &self.command {
            return Ok(cmd.clone());
        }
        dotenvy::dotenv().ok();
        std::env::var(ENGINE_ENV).map(PathBuf::from).map_err(|_| {
            EvaluatorError::NotConfigured(format!("set engine.command or ${ENGINE_ENV}"))
        })
    }

    pub fn timeout(&self) -> Result<Duration, EvaluatorError> {
        if !(self.timeout_secs > 0.0 && self.timeout_secs <= MAX_TIMEOUT_SECS) {
            return Err(EvaluatorError::InvalidEngine(format!(
                "timeout_secs must be in (0, {MAX_TIMEOUT_SECS}], got {}",
                self.timeout_secs
            )));
        }
        Ok(Duration::from_secs_f64(self.timeout_secs))
    }

    /// Checks everything but the command, which may come from the environment later.
    pub fn validate(&self) -> Result<(), EvaluatorError> {
        self.timeout().map(|_| ())
    }
}

/// Shared flag that aborts in-flight engine calls.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExternalEngine {
    command: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    out_of_grid_exit_code: i32,
    cancel: CancellationToken,
}

impl ExternalEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, EvaluatorError> {
        Ok(Self {
            command: config.resolve_command()?,
            args: config.args.clone(),
            timeout: config.timeout()?,
            out_of_grid_exit_code: config.out_of_grid_exit_code,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn run(&self, mode: &str, lines: &[AtomicTransition], extra: &[String]) -> Result<String, EvaluatorError> {
        if self.cancel.is_cancelled() {
            return Err(EvaluatorError::Cancelled);
        }

        let staged = tempfile::Builder::new()
            .prefix("equilibria-lines-")
            .suffix(".csv")
            .tempfile()?;
        write_transitions(staged.as_file(), lines).map_err(|e| EvaluatorError::Failed(e.to_string()))?;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(mode)
            .arg("--lines")
            .arg(staged.path())
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = %self.command.display(), mode, lines = lines.len(), "running engine");
        let mut child = command.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        match status.code() {
            Some(0) => Ok(stdout),
            Some(code) if code == self.out_of_grid_exit_code => Err(EvaluatorError::OutOfGrid(stderr.trim().to_string())),
            Some(code) => Err(EvaluatorError::Failed(format!("exit code {code}: {}", stderr.trim()))),
            None => Err(EvaluatorError::Failed("terminated by signal".to_string())),
        }
    }

    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus, EvaluatorError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if self.cancel.is_cancelled() {
                kill(child);
                return Err(EvaluatorError::Cancelled);
            }
            if Instant::now() >= deadline {
                kill(child);
                return Err(EvaluatorError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

fn photosphere_args(photosphere: &Photosphere, microturbulence: Option<f64>) -> Vec<String> {
    let mut args = vec![
        "--teff".to_string(),
        photosphere.effective_temperature.to_string(),
        "--logg".to_string(),
        photosphere.surface_gravity.to_string(),
        "--mh".to_string(),
        photosphere.metallicity.to_string(),
        "--photosphere".to_string(),
        photosphere.kind.clone(),
    ];
    if let Some(xi) = microturbulence {
        args.push("--xi".to_string());
        args.push(xi.to_string());
    }
    args
}

fn data_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

fn parse_number(token: &str) -> Result<f64, EvaluatorError> {
    token
        .parse::<f64>()
        .map_err(|_| EvaluatorError::Parse(format!("not a number: {token:?}")))
}

pub(crate) fn parse_abundances(output: &str, expected: usize) -> Result<Vec<f64>, EvaluatorError> {
    let values = data_lines(output)
        .map(|l| parse_number(l.split_whitespace().next().unwrap_or(l)))
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != expected {
        return Err(EvaluatorError::CountMismatch {
            expected,
            got: values.len(),
        });
    }
    Ok(values)
}

pub(crate) fn parse_synthesis(output: &str) -> Result<SyntheticSpectrum, EvaluatorError> {
    let mut dispersion = Vec::new();
    let mut flux = Vec::new();
    for line in data_lines(output) {
        let mut cols = line.split(|c: char| c.is_whitespace() || c == ',').filter(|s| !s.is_empty());
        let (Some(x), Some(y)) = (cols.next(), cols.next()) else {
            return Err(EvaluatorError::Parse(format!("expected two columns: {line:?}")));
        };
        dispersion.push(parse_number(x)?);
        flux.push(parse_number(y)?);
    }
    if dispersion.is_empty() {
        return Err(EvaluatorError::Parse("empty synthetic spectrum".to_string()));
    }
    Ok(SyntheticSpectrum { dispersion, flux })
}

impl AbundanceEvaluator for ExternalEngine {
    fn abundances(
        &self,
        lines: &[AtomicTransition],
        photosphere: &Photosphere,
        microturbulence: f64,
    ) -> Result<Vec<f64>, EvaluatorError> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let output = self.run("abundances", lines, &photosphere_args(photosphere, Some(microturbulence)))?;
        parse_abundances(&output, lines.len())
    }
}

impl Synthesiser for ExternalEngine {
    fn synthesise(
        &self,
        lines: &[AtomicTransition],
        photosphere: &Photosphere,
        microturbulence: Option<f64>,
        region: [f64; 2],
        step: f64,
    ) -> Result<SyntheticSpectrum, EvaluatorError> {
        let mut args = photosphere_args(photosphere, microturbulence);
        args.extend([
            "--start".to_string(),
            region[0].to_string(),
            "--end".to_string(),
            region[1].to_string(),
            "--step".to_string(),
            step.to_string(),
        ]);
        let output = self.run("synthesise", lines, &args)?;
        parse_synthesis(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photosphere() -> Photosphere {
        Photosphere {
            effective_temperature: 5777.0,
            surface_gravity: 4.44,
            metallicity: 0.0,
            kind: "marcs".to_string(),
        }
    }

    fn shell(script: &str, timeout_secs: f64) -> ExternalEngine {
        let config = EngineConfig {
            command: Some(PathBuf::from("sh")),
            args: vec!["-c".to_string(), script.to_string(), "engine".to_string()],
            timeout_secs,
            ..EngineConfig::default()
        };
        ExternalEngine::new(&config).unwrap()
    }

    fn two_lines() -> Vec<AtomicTransition> {
        vec![
            AtomicTransition::new(5000.0, 26.0, 1.0, -1.0).with_equivalent_width(40.0),
            AtomicTransition::new(5100.0, 26.1, 2.0, -2.0).with_equivalent_width(30.0),
        ]
    }

    #[test]
    fn parses_engine_output() {
        assert_eq!(parse_abundances("# header\n7.5\n\n7.4 extra\n", 2).unwrap(), vec![7.5, 7.4]);
        assert!(matches!(
            parse_abundances("7.5\n", 2),
            Err(EvaluatorError::CountMismatch { expected: 2, got: 1 })
        ));
        let synth = parse_synthesis("5000.0 1.0\n5000.1,0.9\n").unwrap();
        assert_eq!(synth.flux, vec![1.0, 0.9]);
    }

    #[test]
    fn runs_engine_process() {
        let engine = shell("printf '7.50\\n7.45\\n'", 30.0);
        let abundances = engine.abundances(&two_lines(), &photosphere(), 1.0).unwrap();
        assert_eq!(abundances, vec![7.50, 7.45]);
    }

    #[test]
    fn out_of_grid_exit_code_is_distinguished() {
        let engine = shell("echo 'no such photosphere' >&2; exit 2", 30.0);
        let err = engine.abundances(&two_lines(), &photosphere(), 1.0).unwrap_err();
        assert!(err.is_out_of_grid());

        let engine = shell("exit 7", 30.0);
        let err = engine.abundances(&two_lines(), &photosphere(), 1.0).unwrap_err();
        assert!(matches!(err, EvaluatorError::Failed(_)));
    }

    #[test]
    fn slow_engine_times_out() {
        let engine = shell("sleep 5", 0.2);
        let err = engine.abundances(&two_lines(), &photosphere(), 1.0).unwrap_err();
        assert!(matches!(err, EvaluatorError::Timeout(_)));
    }

    #[test]
    fn unusable_timeouts_are_configuration_errors() {
        for timeout_secs in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e30] {
            let config = EngineConfig {
                command: Some(PathBuf::from("sh")),
                timeout_secs,
                ..EngineConfig::default()
            };
            assert!(matches!(config.validate(), Err(EvaluatorError::InvalidEngine(_))), "{timeout_secs}");
            assert!(matches!(ExternalEngine::new(&config), Err(EvaluatorError::InvalidEngine(_))));
        }
        let config = EngineConfig {
            timeout_secs: MAX_TIMEOUT_SECS,
            ..EngineConfig::default()
        };
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let engine = shell("sleep 5", 30.0).with_cancellation(token);
        let err = engine.abundances(&two_lines(), &photosphere(), 1.0).unwrap_err();
        assert!(matches!(err, EvaluatorError::Cancelled));
    }
}
