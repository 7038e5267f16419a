#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use vista_deploy::DeployConfig;
use vista_deploy::process::{CommandRunner, CommandSpec, ProcessOutput};

pub const ARTIFACT_NAME: &str = "vista-web-ui_1.2.3.ipk";
pub const HOST: &str = "192.168.7.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutput {
    Complete,
    DirectoryOnly,
    Nothing,
}

#[derive(Debug, Clone)]
pub struct Behaviour {
    pub build_exit: i32,
    pub build_output: BuildOutput,
    pub package_exit: i32,
    pub package_writes_artifact: bool,
    pub scp_exit: i32,
    pub scp_stderr: String,
    pub install_exit: i32,
    pub cleanup_exit: i32,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            build_exit: 0,
            build_output: BuildOutput::Complete,
            package_exit: 0,
            package_writes_artifact: true,
            scp_exit: 0,
            scp_stderr: String::new(),
            install_exit: 0,
            cleanup_exit: 0,
        }
    }
}

/// What the simulated device looks like after the run.
#[derive(Debug, Default)]
pub struct Device {
    pub files: HashSet<String>,
    pub installed: Vec<String>,
    pub restarts: u32,
}

/// Stands in for the build tool, the packaging tool, scp and ssh.
pub struct FakeRunner {
    behaviour: Behaviour,
    output_dir: PathBuf,
    marker: String,
    deploy_dir: PathBuf,
    pub calls: Mutex<Vec<CommandSpec>>,
    pub device: Mutex<Device>,
}

impl FakeRunner {
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|spec| {
                Path::new(&spec.program)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or(spec.program)
            })
            .collect()
    }

    pub fn remote_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|spec| spec.program == "ssh")
            .filter_map(|spec| spec.args.last().cloned())
            .collect()
    }

    fn exit(code: i32, stderr: &str) -> io::Result<ProcessOutput> {
        Ok(ProcessOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<ProcessOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let b = &self.behaviour;

        if spec.program.ends_with("build.sh") {
            if b.build_output != BuildOutput::Nothing {
                fs::create_dir_all(self.output_dir.join("assets"))?;
            }
            if b.build_output == BuildOutput::Complete {
                fs::write(self.output_dir.join(&self.marker), "<html></html>")?;
            }
            return Self::exit(b.build_exit, "npm ERR! build failed");
        }

        if spec.program.ends_with("package.sh") {
            if b.package_writes_artifact {
                let dir = self.deploy_dir.join("cortexa7t2hf-neon");
                fs::create_dir_all(&dir)?;
                fs::write(dir.join(ARTIFACT_NAME), b"ipk-bytes")?;
            }
            return Self::exit(b.package_exit, "ERROR: Task failed");
        }

        if spec.program == "scp" {
            if b.scp_exit == 0 {
                let destination = spec.args.last().cloned().unwrap_or_default();
                let remote_path = destination
                    .split_once(':')
                    .map(|(_, path)| path.to_string())
                    .unwrap_or_default();
                self.device.lock().unwrap().files.insert(remote_path);
            }
            return Self::exit(b.scp_exit, &b.scp_stderr);
        }

        if spec.program == "ssh" {
            let command = spec.args.last().cloned().unwrap_or_default();
            let mut device = self.device.lock().unwrap();
            if command.contains("install --force-reinstall") {
                if b.install_exit == 0 {
                    device.installed.push(command.clone());
                    device.restarts += 1;
                }
                return Self::exit(b.install_exit, "Collected errors: * opkg_install_cmd");
            }
            if let Some(path) = command.strip_prefix("rm -f ") {
                if b.cleanup_exit == 0 {
                    device.files.remove(path.trim_matches('\''));
                }
                return Self::exit(b.cleanup_exit, "rm: permission denied");
            }
            return Self::exit(127, "unknown remote command");
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("unexpected program {}", spec.program),
        ))
    }
}

/// A scratch workspace with a web UI source tree, a packaging environment
/// and a config pointing at both.
pub struct Workspace {
    pub temp: TempDir,
    pub config: DeployConfig,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("web")).unwrap();
        fs::write(root.join("web/build.sh"), "#!/bin/sh\nnpm run build\n").unwrap();
        fs::create_dir_all(root.join("poky")).unwrap();
        fs::write(root.join("poky/oe-init-build-env"), "# env\n").unwrap();
        fs::write(root.join("package.sh"), "#!/bin/sh\nbitbake vista-web-ui\n").unwrap();

        let mut config = DeployConfig::default();
        config.target.host = HOST.into();
        config.build.source_dir = root.join("web");
        config.build.tool = "./build.sh".into();
        config.build.args = vec!["--production".into()];
        config.build.output_dir = root.join("web/dist");
        config.packaging.entry_point = "poky/oe-init-build-env".into();
        config.packaging.command = vec!["./package.sh".into(), "vista-web-ui".into()];
        config.packaging.workdir = root.to_path_buf();
        config.packaging.deploy_dir = root.join("deploy/ipk");

        Self { temp, config }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn runner(&self, behaviour: Behaviour) -> Arc<FakeRunner> {
        Arc::new(FakeRunner {
            behaviour,
            output_dir: self.config.build.output_dir.clone(),
            marker: self.config.build.marker.clone(),
            deploy_dir: self.config.packaging.deploy_dir.clone(),
            calls: Mutex::new(Vec::new()),
            device: Mutex::new(Device::default()),
        })
    }

    pub fn remove_packaging_toolchain(&self) {
        fs::remove_file(self.root().join("poky/oe-init-build-env")).unwrap();
    }

    pub fn place_artifact(&self) -> PathBuf {
        let dir = self.config.packaging.deploy_dir.join("all");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(ARTIFACT_NAME);
        fs::write(&path, b"existing").unwrap();
        path
    }

    pub fn build_output(&self) {
        let dir = &self.config.build.output_dir;
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(&self.config.build.marker), "<html></html>").unwrap();
    }
}
