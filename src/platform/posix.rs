//! `sh` command text for Linux build hosts.

use shell_escape::unix::escape;

use super::{Platform, TargetKind};

/// Linux and other POSIX hosts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Posix;

impl Platform for Posix {
    fn kind(&self) -> TargetKind {
        TargetKind::Posix
    }

    fn separator(&self) -> char {
        '/'
    }

    fn top_dir(&self) -> &'static str {
        "/tmp"
    }

    fn package_dir(&self) -> &'static str {
        "linux-64"
    }

    fn probe(&self) -> &'static str {
        "uname -a"
    }

    fn conda_init(&self) -> &'static str {
        "conda init"
    }

    fn quote(&self, path: &str) -> String {
        escape(path.into()).into_owned()
    }

    fn exists(&self, path: &str) -> String {
        format!("if [ -e {} ]; then echo Yes; fi", self.quote(path))
    }

    fn is_dir(&self, path: &str) -> String {
        format!("if [ -d {} ]; then echo Yes; fi", self.quote(path))
    }

    fn mkdir(&self, path: &str) -> String {
        format!("mkdir -p {}", self.quote(path))
    }

    fn mkdir_exclusive(&self, path: &str) -> String {
        format!("mkdir {}", self.quote(path))
    }

    fn list(&self, path: &str) -> String {
        let quoted = self.quote(path);
        format!("if [ -d {quoted} ]; then ls -1A {quoted}; fi")
    }

    fn remove(&self, path: &str, _is_dir: bool) -> String {
        format!("rm -rf {}", self.quote(path))
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
        format!("touch {}", self.quote(path))
    }

    fn cat(&self, path: &str) -> String {
        format!("cat {}", self.quote(path))
    }

    fn tail(&self, path: &str, skip: usize, max: usize) -> String {
        format!(
            "tail -n +{} {} | head -n {max}",
            skip.saturating_add(1),
            self.quote(path)
        )
    }

    fn in_dir(&self, dir: &str, command: &str) -> String {
        format!("cd {} && {command}", self.quote(dir))
    }

    fn sequence(&self, first: &str, then: &str) -> String {
        format!("({first}); {then}")
    }

    fn detach(&self, job: &str) -> String {
        format!(
            "nohup sh -c {} > /dev/null 2>&1 < /dev/null &",
            escape(job.into())
        )
    }

    fn glob(&self, dir: &str, pattern: &str) -> String {
        format!("{}/{pattern}", self.quote(dir))
    }

    fn driver_install(&self, _work_dir: &str) -> Option<String> {
        None
    }
}
