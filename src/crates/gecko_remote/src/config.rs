use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RemoteError, RemoteResult};

/// Port GeckoCIRCUITS listens on for remote access unless configured otherwise.
pub const DEFAULT_GECKO_PORT: u16 = 43036;

pub const GECKO_JAR: &str = "GeckoCIRCUITS.jar";

pub const GECKO_HOME_ENV: &str = "GECKO_HOME";
pub const JAVA_HOME_ENV: &str = "JAVA_HOME";

/// Process-level configuration for launching the engine bridge.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the bridge binary to spawn.
    pub binary_path: PathBuf,
    /// Additional CLI arguments passed through to the bridge.
    pub extra_args: Vec<String>,
    /// Remote-access port of the GeckoCIRCUITS instance behind the bridge.
    pub gecko_port: u16,
    /// Install locations exported to the child as `CLASSPATH` and `JAVA_HOME`.
    pub install: Option<InstallPaths>,
    /// Extra environment variables applied to the child process.
    pub env: BTreeMap<String, String>,
    /// Optional working directory override for the child process.
    pub working_directory: Option<PathBuf>,
    /// Upper bound on how long to wait for the bridge to announce its listen address.
    pub startup_timeout: Duration,
}

impl EngineConfig {
    /// Create a new config targeting a specific bridge binary.
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            extra_args: Vec::new(),
            gecko_port: DEFAULT_GECKO_PORT,
            install: None,
            env: BTreeMap::new(),
            working_directory: None,
            startup_timeout: Duration::from_secs(5),
        }
    }

    /// Add a passthrough CLI argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_gecko_port(mut self, port: u16) -> Self {
        self.gecko_port = port;
        self
    }

    /// Export resolved install locations to the child environment.
    pub fn with_install_paths(mut self, paths: InstallPaths) -> Self {
        self.install = Some(paths);
        self
    }

    /// Add an environment variable override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Override the working directory for the spawned process.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Override the startup timeout used while waiting for the listen address.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Full environment for the child, install paths first so explicit
    /// overrides win.
    pub(crate) fn child_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(install) = &self.install {
            let java = install.java_dir.display().to_string();
            env.insert("CLASSPATH".to_string(), install.gecko_jar().display().to_string());
            env.insert(JAVA_HOME_ENV.to_string(), java.clone());
            env.insert("JDK_HOME".to_string(), java);
        }
        env.extend(self.env.clone());
        env
    }
}

/// Which install location a prompt is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallItem {
    /// Directory holding `GeckoCIRCUITS.jar`.
    Gecko,
    /// Java installation root, containing `bin`.
    Java,
}

impl InstallItem {
    fn question(self) -> &'static str {
        match self {
            InstallItem::Gecko => "Enter the path to the Gecko directory: ",
            InstallItem::Java => {
                "Enter the path to the Java directory \
                 (e.g. C:/Programme/Java/jdk-17 or /usr/lib/jvm/java-17-openjdk): "
            }
        }
    }

    fn is_valid(self, dir: &Path) -> bool {
        match self {
            InstallItem::Gecko => dir.join(GECKO_JAR).is_file(),
            InstallItem::Java => dir.join("bin").is_dir(),
        }
    }
}

/// Source of install locations when neither the environment nor the
/// persisted record provides them.
///
/// Returning `None` gives up and fails resolution.
pub trait InstallPrompt {
    fn ask(&mut self, item: InstallItem) -> Option<PathBuf>;
}

impl<F> InstallPrompt for F
where
    F: FnMut(InstallItem) -> Option<PathBuf>,
{
    fn ask(&mut self, item: InstallItem) -> Option<PathBuf> {
        self(item)
    }
}

/// Interactive prompt over a reader/writer pair, usually stdin/stdout.
pub struct StdinPrompt<R, W> {
    input: R,
    output: W,
}

impl StdinPrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> StdinPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> InstallPrompt for StdinPrompt<R, W> {
    fn ask(&mut self, item: InstallItem) -> Option<PathBuf> {
        write!(self.output, "{}", item.question()).ok()?;
        self.output.flush().ok()?;
        let mut line = String::new();
        if self.input.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let answer = line.trim();
        if answer.is_empty() {
            None
        } else {
            Some(PathBuf::from(answer))
        }
    }
}

/// Resolved install locations of GeckoCIRCUITS and the Java runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPaths {
    #[serde(rename = "gecko")]
    pub gecko_dir: PathBuf,
    #[serde(rename = "java")]
    pub java_dir: PathBuf,
}

impl InstallPaths {
    pub fn new(gecko_dir: impl Into<PathBuf>, java_dir: impl Into<PathBuf>) -> Self {
        Self {
            gecko_dir: gecko_dir.into(),
            java_dir: java_dir.into(),
        }
    }

    pub fn gecko_jar(&self) -> PathBuf {
        self.gecko_dir.join(GECKO_JAR)
    }

    pub fn java_bin(&self) -> PathBuf {
        self.java_dir.join("bin")
    }

    /// True when both locations still exist on disk.
    pub fn is_valid(&self) -> bool {
        self.gecko_jar().is_file() && self.java_bin().is_dir()
    }

    /// Resolve install locations: environment, then persisted record, then prompt.
    pub fn resolve(resolver: &mut ConfigResolver<'_>) -> RemoteResult<Self> {
        resolver.resolve()
    }

    pub fn load(path: &Path) -> RemoteResult<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> RemoteResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// Resolution chain for [`InstallPaths`].
pub struct ConfigResolver<'a> {
    env: BTreeMap<String, String>,
    record_path: Option<PathBuf>,
    prompt: Option<&'a mut dyn InstallPrompt>,
}

impl<'a> ConfigResolver<'a> {
    /// A resolver that reads the process environment.
    pub fn new() -> Self {
        let env = [GECKO_HOME_ENV, JAVA_HOME_ENV]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Self {
            env,
            record_path: None,
            prompt: None,
        }
    }

    /// Replace the environment snapshot, mostly for tests.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// JSON record consulted after the environment and written after a prompt.
    pub fn with_record(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    pub fn with_prompt(mut self, prompt: &'a mut dyn InstallPrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn resolve(&mut self) -> RemoteResult<InstallPaths> {
        if let Some(paths) = self.from_env() {
            debug!(gecko = %paths.gecko_dir.display(), "install paths from environment");
            return Ok(paths);
        }
        if let Some(paths) = self.from_record()? {
            debug!(gecko = %paths.gecko_dir.display(), "install paths from record");
            return Ok(paths);
        }

        let prompt = self.prompt.as_deref_mut().ok_or_else(|| {
            RemoteError::configuration(
                "GeckoCIRCUITS and Java locations are unknown and no prompt is available",
            )
        })?;
        let paths = InstallPaths {
            gecko_dir: ask_until_valid(prompt, InstallItem::Gecko)?,
            java_dir: ask_until_valid(prompt, InstallItem::Java)?,
        };

        if let Some(record) = &self.record_path {
            paths.save(record)?;
            info!(record = %record.display(), "install paths saved");
        }
        Ok(paths)
    }

    fn from_env(&self) -> Option<InstallPaths> {
        let gecko = self.env.get(GECKO_HOME_ENV)?;
        let java = self.env.get(JAVA_HOME_ENV)?;
        let paths = InstallPaths::new(gecko, java);
        if paths.is_valid() {
            Some(paths)
        } else {
            warn!(%gecko, %java, "install paths from environment are not valid");
            None
        }
    }

    fn from_record(&self) -> RemoteResult<Option<InstallPaths>> {
        let Some(record) = &self.record_path else {
            return Ok(None);
        };
        if !record.exists() {
            return Ok(None);
        }
        match InstallPaths::load(record) {
            Ok(paths) if paths.is_valid() => Ok(Some(paths)),
            Ok(_) | Err(RemoteError::Json(_)) => {
                warn!(record = %record.display(), "removing stale install record");
                fs::remove_file(record)?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl Default for ConfigResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn ask_until_valid(prompt: &mut dyn InstallPrompt, item: InstallItem) -> RemoteResult<PathBuf> {
    loop {
        let Some(dir) = prompt.ask(item) else {
            return Err(RemoteError::configuration(format!(
                "no valid {item:?} location provided"
            )));
        };
        if item.is_valid(&dir) {
            return Ok(dir);
        }
        warn!(path = %dir.display(), ?item, "location does not contain the expected files");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_install(root: &Path) -> InstallPaths {
        let gecko = root.join("gecko");
        let java = root.join("jdk");
        fs::create_dir_all(&gecko).unwrap();
        fs::create_dir_all(java.join("bin")).unwrap();
        fs::write(gecko.join(GECKO_JAR), b"jar").unwrap();
        InstallPaths::new(gecko, java)
    }

    #[test]
    fn environment_wins_over_record() {
        let tmp = TempDir::new().unwrap();
        let paths = fake_install(tmp.path());
        let env = BTreeMap::from([
            (GECKO_HOME_ENV.to_string(), paths.gecko_dir.display().to_string()),
            (JAVA_HOME_ENV.to_string(), paths.java_dir.display().to_string()),
        ]);
        let resolved = ConfigResolver::new()
            .with_env(env)
            .with_record(tmp.path().join("missing.json"))
            .resolve()
            .unwrap();
        assert_eq!(resolved, paths);
    }

    #[test]
    fn record_is_used_when_valid() {
        let tmp = TempDir::new().unwrap();
        let paths = fake_install(tmp.path());
        let record = tmp.path().join("config.json");
        paths.save(&record).unwrap();

        let resolved = ConfigResolver::new()
            .with_env(BTreeMap::new())
            .with_record(&record)
            .resolve()
            .unwrap();
        assert_eq!(resolved, paths);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&record).unwrap()).unwrap();
        assert!(raw.get("gecko").is_some() && raw.get("java").is_some());
    }

    #[test]
    fn stale_record_is_removed_and_prompt_answers_are_saved() {
        let tmp = TempDir::new().unwrap();
        let record = tmp.path().join("config.json");
        InstallPaths::new("/nope/gecko", "/nope/java")
            .save(&record)
            .unwrap();
        let paths = fake_install(tmp.path());

        let mut asked = Vec::new();
        let answers = paths.clone();
        let mut prompt = |item: InstallItem| {
            asked.push(item);
            Some(match item {
                InstallItem::Gecko => answers.gecko_dir.clone(),
                InstallItem::Java => answers.java_dir.clone(),
            })
        };

        let resolved = ConfigResolver::new()
            .with_env(BTreeMap::new())
            .with_record(&record)
            .with_prompt(&mut prompt)
            .resolve()
            .unwrap();
        assert_eq!(resolved, paths);
        assert_eq!(asked, vec![InstallItem::Gecko, InstallItem::Java]);
        assert_eq!(InstallPaths::load(&record).unwrap(), paths);
    }

    #[test]
    fn prompt_is_asked_again_for_invalid_answers() {
        let tmp = TempDir::new().unwrap();
        let paths = fake_install(tmp.path());
        let input = format!(
            "{}\n{}\n{}\n",
            tmp.path().join("wrong").display(),
            paths.gecko_dir.display(),
            paths.java_dir.display()
        );
        let mut output = Vec::new();
        let mut prompt = StdinPrompt::new(input.as_bytes(), &mut output);

        let resolved = ConfigResolver::new()
            .with_env(BTreeMap::new())
            .with_prompt(&mut prompt)
            .resolve()
            .unwrap();
        assert_eq!(resolved, paths);
        drop(prompt);
        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches("Gecko directory").count(), 2);
    }

    #[test]
    fn missing_prompt_is_a_configuration_error() {
        let err = ConfigResolver::new()
            .with_env(BTreeMap::new())
            .resolve()
            .unwrap_err();
        assert!(matches!(err, RemoteError::Configuration(_)));
    }

    #[test]
    fn validity_follows_the_install_layout() {
        let tmp = TempDir::new().unwrap();
        let paths = fake_install(tmp.path());
        assert_eq!(paths.java_bin(), tmp.path().join("jdk").join("bin"));
        assert!(paths.is_valid());

        fs::remove_dir(paths.java_bin()).unwrap();
        assert!(!paths.is_valid());
    }

    #[test]
    fn install_paths_are_exported_to_the_child() {
        let config = EngineConfig::new("bridge")
            .with_install_paths(InstallPaths::new("/opt/gecko", "/opt/jdk"))
            .with_env("JAVA_HOME", "/override");
        let env = config.child_env();
        assert_eq!(
            env["CLASSPATH"],
            Path::new("/opt/gecko").join(GECKO_JAR).display().to_string()
        );
        assert_eq!(env["JAVA_HOME"], "/override");
        assert_eq!(env["JDK_HOME"], "/opt/jdk");
    }
}
