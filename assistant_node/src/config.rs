use serde::Deserialize;
use sightline_proto::FrameConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub detection_server: DetectionServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    pub speech: SpeechConfig,
    pub vision: VisionConfig,
    pub generative: GenerativeConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

/// Status endpoint (health and metrics).
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub transport: FrameConfig,
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    10
}

impl DetectionServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
}

fn default_frame_width() -> u32 {
    1280
}

fn default_frame_height() -> u32 {
    720
}

fn default_warmup_ms() -> u64 {
    2000
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            warmup_ms: default_warmup_ms(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct PipelineConfig {
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    #[serde(default = "default_ocr_poll_interval_ms")]
    pub ocr_poll_interval_ms: u64,
    #[serde(default = "default_ocr_max_polls")]
    pub ocr_max_polls: u32,
}

fn default_sampling_interval() -> u64 {
    20
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_dequeue_timeout_ms() -> u64 {
    500
}

fn default_ocr_poll_interval_ms() -> u64 {
    500
}

fn default_ocr_max_polls() -> u32 {
    20
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            poll_interval_ms: default_poll_interval_ms(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            ocr_poll_interval_ms: default_ocr_poll_interval_ms(),
            ocr_max_polls: default_ocr_max_polls(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct VoiceConfig {
    #[serde(default = "default_wake_word")]
    pub wake_word: String,
    #[serde(default = "default_acknowledgement")]
    pub acknowledgement: String,
}

fn default_wake_word() -> String {
    "hi my sign".to_string()
}

fn default_acknowledgement() -> String {
    "Hi, how can I assist?".to_string()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_word: default_wake_word(),
            acknowledgement: default_acknowledgement(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct SpeechConfig {
    pub key: String,
    pub region: String,
    #[serde(default = "default_voice_name")]
    pub voice_name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u64,
    #[serde(default = "default_trailing_silence_ms")]
    pub trailing_silence_ms: u64,
}

fn default_voice_name() -> String {
    "en-US-AriaNeural".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_max_utterance_ms() -> u64 {
    15_000
}

fn default_trailing_silence_ms() -> u64 {
    1_200
}

impl std::fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("region", &self.region)
            .field("voice_name", &self.voice_name)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize)]
pub struct VisionConfig {
    pub endpoint: String,
    pub key: String,
}

impl std::fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionConfig")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize)]
pub struct GenerativeConfig {
    pub api_key: String,
    #[serde(default = "default_generative_model")]
    pub model: String,
    #[serde(default = "default_generative_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_generative_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_generative_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    150
}

impl std::fmt::Debug for GenerativeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerativeConfig")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No working directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("NODE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}
