//! `cmd.exe` command text for Windows build hosts.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::{Platform, TargetKind};

const DRIVER_SCRIPTS: [&str; 2] = ["cuda_driver", "cuda_12.3.0"];

/// Windows hosts running the OpenSSH server with `cmd.exe` as shell.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Windows;

impl Windows {
    /// Encodes a PowerShell script for `-EncodedCommand` (UTF-16LE, base64).
    #[expect(
        clippy::little_endian_bytes,
        reason = "PowerShell decodes -EncodedCommand as UTF-16LE regardless of host"
    )]
    fn encode_script(script: &str) -> String {
        let bytes: Vec<u8> = script
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        STANDARD.encode(bytes)
    }
}

impl Platform for Windows {
    fn kind(&self) -> TargetKind {
        TargetKind::Windows
    }

    fn separator(&self) -> char {
        '\\'
    }

    fn top_dir(&self) -> &'static str {
        "\\"
    }

    fn package_dir(&self) -> &'static str {
        "win-64"
    }

    fn probe(&self) -> &'static str {
        "ver"
    }

    fn conda_init(&self) -> &'static str {
        "C:\\miniconda3\\Scripts\\conda.exe init"
    }

    fn quote(&self, path: &str) -> String {
        format!("\"{path}\"")
    }

    fn exists(&self, path: &str) -> String {
        format!("if exist {} echo Yes", self.quote(path))
    }

    fn is_dir(&self, path: &str) -> String {
        format!("if exist {} echo Yes", self.quote(&format!("{path}\\*")))
    }

    fn mkdir(&self, path: &str) -> String {
        format!("mkdir {}", self.quote(path))
    }

    fn mkdir_exclusive(&self, path: &str) -> String {
        self.mkdir(path)
    }

    fn list(&self, path: &str) -> String {
        format!(
            "if exist {} (dir /b /a {} 2>nul || type nul)",
            self.quote(&format!("{path}\\*")),
            self.quote(path)
        )
    }

    fn remove(&self, path: &str, is_dir: bool) -> String {
        if is_dir {
            format!("rd /s /q {}", self.quote(path))
        } else {
            format!("del /f /q {}", self.quote(path))
        }
    }

    fn extract(&self, archive: &str, dest: &str) -> String {
        format!("tar -x -f {} -C {}", self.quote(archive), self.quote(dest))
    }

    fn create_archive(&self, cwd: &str, archive: &str, members: &[String]) -> String {
        let mut command = format!("tar -cf {}", self.quote(archive));
        for member in members {
            command.push(' ');
            command.push_str(&self.quote(member));
        }
        self.in_dir(cwd, &command)
    }

    fn touch(&self, path: &str) -> String {
        format!("type nul > {}", self.quote(path))
    }

    fn cat(&self, path: &str) -> String {
        format!("type {}", self.quote(path))
    }

    fn tail(&self, path: &str, skip: usize, max: usize) -> String {
        let path = path.replace('\'', "''");
        format!(
            "powershell -NoProfile -Command \"Get-Content -LiteralPath '{path}' | Select-Object -Skip {skip} -First {max}\""
        )
    }

    fn in_dir(&self, dir: &str, command: &str) -> String {
        format!("cd /d {} && {command}", self.quote(dir))
    }

    fn sequence(&self, first: &str, then: &str) -> String {
        format!("({first}) & {then}")
    }

    fn detach(&self, job: &str) -> String {
        // Processes created through WMI live outside the SSH session's job
        // object, so closing the channel does not kill them.
        let command_line = format!("cmd.exe /c {job}").replace('\'', "''");
        let script = format!(
            "Invoke-CimMethod -ClassName Win32_Process -MethodName Create -Arguments @{{CommandLine='{command_line}'}} | Out-Null"
        );
        format!(
            "powershell -NoProfile -EncodedCommand {}",
            Self::encode_script(&script)
        )
    }

    fn glob(&self, dir: &str, pattern: &str) -> String {
        format!("{dir}\\{pattern}")
    }

    fn driver_install(&self, work_dir: &str) -> Option<String> {
        let steps = DRIVER_SCRIPTS
            .iter()
            .map(|name| {
                format!(
                    "powershell -ExecutionPolicy ByPass -File \\prefect\\install_{name}.ps1 > {} 2>&1",
                    self.quote(&self.path_join(&[work_dir, &format!("{name}.log")]))
                )
            })
            .collect::<Vec<_>>();
        Some(steps.join(" && "))
    }

    fn transfer_path(&self, path: &str) -> String {
        path.replace('\\', "/")
    }
}
