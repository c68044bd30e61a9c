//! Hardware emulation of a compiled kernel on a remote build host
//!
//! Consumes an `xclbin` and produces the waveform database (`wdb`) of one
//! emulated run. Everything runs over a single [`RemoteSession`]; once the
//! connection is open the session is released on every exit path.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stagewright_source::{tmp_dir, Source, SourceType, Stream};

use crate::cancel::{CancelToken, ExecLimits};
use crate::config::{ConfigError, ConfigProvider, ExecutionContext};
use crate::errors::{DriverError, DriverResult};
use crate::remote::{Connector, RemoteSession, SshConfig, SshConnector};
use crate::shell::CommandLine;
use crate::stage::{Script, Stage, StageInfo};
use crate::step::Step;

/// Configuration table of this stage
pub const STAGE_NAME: &str = "wdb";

/// Remote tools and target device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub device: String,
    pub setup_commands: String,
    pub runtime_include: String,
    pub vendor_include: String,
    pub runtime_lib: String,
    pub emconfigutil: String,
}

impl Toolchain {
    fn from_context(ctx: &ExecutionContext) -> DriverResult<Self> {
        let get = |key: &str| ctx.require_str(STAGE_NAME, key).map(str::to_string);
        Ok(Self {
            device: get("device")?,
            setup_commands: get("setup_commands")?,
            runtime_include: get("runtime_include")?,
            vendor_include: get("vendor_include")?,
            runtime_lib: get("runtime_lib")?,
            emconfigutil: get("emconfigutil")?,
        })
    }

    pub fn compile_command(&self, dir: &str) -> CommandLine {
        CommandLine::from_tokens([
            format!("cd {}", dir).as_str(),
            "&&",
            "g++",
            format!("-I{}", self.runtime_include).as_str(),
            format!("-I{}", self.vendor_include).as_str(),
            "-Wall -O0 -g -std=c++14 -fmessage-length=0",
            "host.cpp",
            "-o 'host'",
            format!("-L{}", self.runtime_lib).as_str(),
            "-lOpenCL -lpthread -lrt -lstdc++",
        ])
    }

    pub fn device_config_command(&self, dir: &str) -> CommandLine {
        CommandLine::from_tokens([
            format!("cd {}", dir).as_str(),
            "&&",
            self.emconfigutil.as_str(),
            format!("--platform {}", self.device).as_str(),
            "--od .",
        ])
    }

    pub fn emulate_command(&self, dir: &str) -> CommandLine {
        CommandLine::from_tokens([
            format!("cd {}", dir).as_str(),
            "&&",
            self.setup_commands.as_str(),
            "&&",
            "XCL_EMULATION_MODE=hw_emu",
            "./host",
            "kernel.xclbin",
            self.device.as_str(),
        ])
    }

    /// Waveform database written by the emulator into its working directory
    pub fn artifact_path(&self, dir: &str) -> String {
        format!("{}/{}-0-kernel.wdb", dir, self.device)
    }
}

/// Settings read when the stage is built; required ones are checked by the
/// first step so nothing else happens when they are missing
#[derive(Debug, Clone)]
struct Settings {
    host_cpp: Option<PathBuf>,
    ssh: Option<SshConfig>,
    xrt: PathBuf,
    toolchain: Toolchain,
}

impl Settings {
    fn from_context(ctx: &ExecutionContext) -> DriverResult<Self> {
        let port = ssh_port(ctx)?;
        let ssh = ctx.get_str(STAGE_NAME, "ssh_host").map(|host| SshConfig {
            host: host.to_string(),
            user: ctx.get_str(STAGE_NAME, "ssh_username").map(str::to_string),
            key_path: ctx.get_str(STAGE_NAME, "ssh_key").map(str::to_string),
            port: port.unwrap_or(SshConfig::default().port),
            ..SshConfig::default()
        });

        let xrt = match ctx.get_str(STAGE_NAME, "xrt") {
            Some(path) => PathBuf::from(path),
            None => {
                let root = ctx.global("root_dir").and_then(Value::as_str).unwrap_or(".");
                PathBuf::from(root).join("fud").join("bitstream").join("xrt.ini")
            }
        };

        Ok(Self {
            host_cpp: ctx.get_str(STAGE_NAME, "host").map(PathBuf::from),
            ssh,
            xrt,
            toolchain: Toolchain::from_context(ctx)?,
        })
    }
}

/// `ssh_port` as a TCP port; an integer or a string of digits
fn ssh_port(ctx: &ExecutionContext) -> DriverResult<Option<u16>> {
    let Some(value) = ctx.get(STAGE_NAME, "ssh_port") else {
        return Ok(None);
    };
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    match port {
        Some(port) if port != 0 => Ok(Some(port)),
        _ => Err(ConfigError::InvalidValue {
            key: format!("{}.ssh_port", STAGE_NAME),
            expected: "a port number between 1 and 65535",
            value: value.to_string(),
        }
        .into()),
    }
}

/// Limits configured for the long-running remote steps
pub fn configured_limits(ctx: &ExecutionContext, cancel: Option<CancelToken>) -> ExecLimits {
    let mut limits = ExecLimits::none();
    if let Some(seconds) = ctx.get(STAGE_NAME, "timeout_seconds").and_then(Value::as_u64) {
        limits = limits.with_timeout(Duration::from_secs(seconds));
    }
    if let Some(token) = cancel {
        limits = limits.with_cancel(token);
    }
    limits
}

struct Steps {
    check_config: Step,
    connect: Step,
    provision_remote_dir: Step,
    upload: Step,
    compile_remote: Step,
    generate_device_config: Step,
    run_emulation: Step,
    download_artifact: Step,
    cleanup: Step,
}

/// Runs hardware emulation of an `xclbin` on a remote host
pub struct HwEmulationStage {
    info: StageInfo,
    steps: Steps,
}

impl HwEmulationStage {
    /// Stage over SSH with the limits from the configuration
    pub fn new(ctx: &ExecutionContext, cancel: Option<CancelToken>) -> DriverResult<Self> {
        Self::with_parts(ctx, Arc::new(SshConnector), configured_limits(ctx, cancel))
    }

    pub fn with_parts(
        ctx: &ExecutionContext,
        connector: Arc<dyn Connector>,
        limits: ExecLimits,
    ) -> DriverResult<Self> {
        let settings = Settings::from_context(ctx)?;
        Ok(Self {
            info: StageInfo::new("xclbin", STAGE_NAME, SourceType::Path, SourceType::Stream)
                .describe("Runs Vivado hw emulation"),
            steps: build_steps(settings, connector, limits),
        })
    }
}

impl Stage for HwEmulationStage {
    fn info(&self) -> &StageInfo {
        &self.info
    }

    fn execute(&self, input: Source) -> DriverResult<Source> {
        let steps = &self.steps;
        let mut script = Script::new(self.name(), input);
        let kernel = script.input();

        script.run(&steps.check_config, &[])?;
        let session = script.eval(&steps.connect, &[])?;
        script.defer(&steps.cleanup, &[session])?;

        let dir = script.eval(&steps.provision_remote_dir, &[session])?;
        script.run(&steps.upload, &[session, dir, kernel])?;
        script.run(&steps.compile_remote, &[session, dir])?;
        script.run(&steps.generate_device_config, &[session, dir])?;
        script.run(&steps.run_emulation, &[session, dir])?;
        let wdb = script.eval(&steps.download_artifact, &[session, dir])?;

        script.finish(wdb, self.output_type())
    }
}

fn build_steps(settings: Settings, connector: Arc<dyn Connector>, limits: ExecLimits) -> Steps {
    let settings = Arc::new(settings);
    let limits = Arc::new(limits);

    let check_config = {
        let settings = Arc::clone(&settings);
        Step::builder("check_config")
            .describe("Make sure that `-s wdb.host` and `-s wdb.ssh_host` are provided")
            .body(move |_| {
                if settings.host_cpp.is_none() {
                    return Err(DriverError::MissingDynamicConfiguration(format!(
                        "{}.host",
                        STAGE_NAME
                    )));
                }
                if settings.ssh.is_none() {
                    return Err(DriverError::MissingDynamicConfiguration(format!(
                        "{}.ssh_host",
                        STAGE_NAME
                    )));
                }
                Ok(None)
            })
    };

    let connect = {
        let settings = Arc::clone(&settings);
        Step::builder("connect")
            .describe("Establish SSH connection")
            .returns(SourceType::Untyped)
            .body(move |_| {
                let config = settings.ssh.as_ref().ok_or_else(|| {
                    DriverError::MissingDynamicConfiguration(format!("{}.ssh_host", STAGE_NAME))
                })?;
                let client = connector.connect(config)?;
                Ok(Some(Source::untyped(RemoteSession::new(client))))
            })
    };

    let provision_remote_dir = Step::builder("provision_remote_dir")
        .describe("Create a temporary directory on the remote host")
        .param("session", SourceType::Untyped)
        .returns(SourceType::String)
        .body(|args| {
            let dir = args.untyped_mut::<RemoteSession>(0)?.provision()?;
            Ok(Some(Source::String(dir)))
        });

    let upload = {
        let settings = Arc::clone(&settings);
        Step::builder("upload")
            .describe("Copy the kernel, host source and runtime config to the remote host")
            .param("session", SourceType::Untyped)
            .param("dir", SourceType::String)
            .param("xclbin", SourceType::Path)
            .body(move |args| {
                let dir = args.str(1)?.to_string();
                let kernel = args.path(2)?.to_path_buf();
                let host_cpp = settings.host_cpp.clone().ok_or_else(|| {
                    DriverError::MissingDynamicConfiguration(format!("{}.host", STAGE_NAME))
                })?;

                let session = args.untyped_mut::<RemoteSession>(0)?;
                session.put(&kernel, &format!("{}/kernel.xclbin", dir))?;
                session.put(&host_cpp, &format!("{}/host.cpp", dir))?;
                session.put(&settings.xrt, &format!("{}/xrt.ini", dir))?;
                Ok(None)
            })
    };

    let remote_command = |name: &str, describe: &str, command: fn(&Toolchain, &str) -> CommandLine| {
        let settings = Arc::clone(&settings);
        let limits = Arc::clone(&limits);
        Step::builder(name)
            .describe(describe)
            .param("session", SourceType::Untyped)
            .param("dir", SourceType::String)
            .body(move |args| {
                let line = command(&settings.toolchain, args.str(1)?);
                args.untyped_mut::<RemoteSession>(0)?
                    .run_logged(line.as_str(), &limits)?;
                Ok(None)
            })
    };

    let compile_remote = remote_command(
        "compile_remote",
        "Compile the host code",
        Toolchain::compile_command,
    );
    let generate_device_config = remote_command(
        "generate_device_config",
        "Generate emconfig.json",
        Toolchain::device_config_command,
    );
    let run_emulation = remote_command(
        "run_emulation",
        "Emulate the xclbin",
        Toolchain::emulate_command,
    );

    let download_artifact = {
        let settings = Arc::clone(&settings);
        Step::builder("download_artifact")
            .describe("Download the waveform database")
            .param("session", SourceType::Untyped)
            .param("dir", SourceType::String)
            .returns(SourceType::Stream)
            .body(move |args| {
                let remote = settings.toolchain.artifact_path(args.str(1)?);
                // Handed to the caller along with the stream.
                let local_dir = tmp_dir()?;
                let local = local_dir.name().join("kernel.wdb");

                args.untyped_mut::<RemoteSession>(0)?.get(&remote, &local)?;
                let file = File::open(&local)?;
                Ok(Some(Source::Stream(Stream::with_backing(file, local))))
            })
    };

    let cleanup = Step::builder("cleanup")
        .describe("Close SSH connection and remove the remote directory")
        .param("session", SourceType::Untyped)
        .release()
        .body(|args| {
            args.untyped_mut::<RemoteSession>(0)?.release()?;
            Ok(None)
        });

    Steps {
        check_config,
        connect,
        provision_remote_dir,
        upload,
        compile_remote,
        generate_device_config,
        run_emulation,
        download_artifact,
        cleanup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toolchain() -> Toolchain {
        Toolchain::from_context(&ExecutionContext::default()).unwrap()
    }

    #[test]
    fn test_compile_command() {
        let line = toolchain().compile_command("/tmp/x");
        assert_eq!(
            line.as_str(),
            "cd /tmp/x && g++ -I/opt/xilinx/xrt/include -I/scratch/opt/Xilinx/Vivado/2020.2/include \
             -Wall -O0 -g -std=c++14 -fmessage-length=0 host.cpp -o 'host' -L/opt/xilinx/xrt/lib \
             -lOpenCL -lpthread -lrt -lstdc++"
        );
    }

    #[test]
    fn test_emulate_command_sources_setup_first() {
        let line = toolchain().emulate_command("/tmp/x");
        let text = line.as_str();
        assert!(text.starts_with("cd /tmp/x && source "));
        assert!(text.ends_with(
            "&& XCL_EMULATION_MODE=hw_emu ./host kernel.xclbin xilinx_u50_gen3x16_xdma_201920_3"
        ));
    }

    #[test]
    fn test_artifact_path_follows_device() {
        let ctx = ExecutionContext::from_value(json!({"stages": {"wdb": {"device": "u280"}}}));
        let tc = Toolchain::from_context(&ctx).unwrap();
        assert_eq!(tc.artifact_path("/tmp/x"), "/tmp/x/u280-0-kernel.wdb");
        assert_eq!(
            tc.device_config_command("/tmp/x").as_str(),
            "cd /tmp/x && /scratch/opt/Xilinx/Vitis/2020.2/bin/emconfigutil --platform u280 --od ."
        );
    }

    #[test]
    fn test_xrt_defaults_under_root_dir() {
        let ctx = ExecutionContext::from_value(json!({"global": {"root_dir": "/opt/tool"}}));
        let settings = Settings::from_context(&ctx).unwrap();
        assert_eq!(settings.xrt, PathBuf::from("/opt/tool/fud/bitstream/xrt.ini"));
        assert!(settings.ssh.is_none());
    }

    #[test]
    fn test_ssh_settings() {
        let ctx = ExecutionContext::from_value(json!({
            "stages": {"wdb": {
                "ssh_host": "fpga01",
                "ssh_username": "builder",
                "ssh_port": 2222,
            }}
        }));
        let ssh = Settings::from_context(&ctx).unwrap().ssh.unwrap();
        assert_eq!(ssh.destination(), "builder@fpga01");
        assert_eq!(ssh.port, 2222);
    }

    #[test]
    fn test_ssh_port_accepts_quoted_digits() {
        let ctx = ExecutionContext::from_value(json!({
            "stages": {"wdb": {"ssh_host": "fpga01", "ssh_port": "2200"}}
        }));
        assert_eq!(Settings::from_context(&ctx).unwrap().ssh.unwrap().port, 2200);
    }

    #[test]
    fn test_bad_ssh_port_is_configuration_error() {
        for bad in [json!(70000), json!(0), json!("twenty-two"), json!(-1), json!(true)] {
            let ctx = ExecutionContext::from_value(json!({
                "stages": {"wdb": {"ssh_host": "fpga01", "ssh_port": bad.clone()}}
            }));
            let err = Settings::from_context(&ctx).unwrap_err();
            match &err {
                DriverError::Config(ConfigError::InvalidValue { key, value, .. }) => {
                    assert_eq!(key, "wdb.ssh_port");
                    assert_eq!(value, &bad.to_string());
                }
                other => panic!("unexpected error for {bad}: {other}"),
            }
            assert_eq!(err.exit_code(), 1);
        }
    }

    #[test]
    fn test_configured_limits() {
        let ctx = ExecutionContext::default();
        let limits = configured_limits(&ctx, None);
        assert!(limits.timeout.is_none());
        assert!(limits.cancel.is_none());

        let ctx = ExecutionContext::from_value(json!({"stages": {"wdb": {"timeout_seconds": 600}}}));
        let limits = configured_limits(&ctx, Some(CancelToken::new()));
        assert_eq!(limits.timeout, Some(Duration::from_secs(600)));
        assert!(limits.cancel.is_some());
    }
}
