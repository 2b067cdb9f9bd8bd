//! Self-contained reproduction scripts for failing trials.
//!
//! A trial directory is created in a scratch location and may later be moved into the output
//! directory, so the script refers to it through `DIR=`, initially set to [`DIR_PLACEHOLDER`] and
//! patched once the directory has reached its final place. Every path and argument is shell
//! quoted.

use std::fs;
use std::io;
use std::path::Path;

use crate::exec::{shell_quote, Invocation};

pub const REPRO_FILE_NAME: &str = "repro.sh";
pub const DIR_PLACEHOLDER: &str = "__FILL_IN_DIR__";

/// Everything a repro script replays.
pub struct ReproScript<'a> {
    /// `packet-verif` binary used for `subst` and `normalize`.
    pub verif_exe: &'a Path,
    pub trial_dir: &'a Path,
    /// Compilation of `out_repro.S` inside the trial directory.
    pub compile: &'a Invocation,
    /// `None` when the engine could not even be started.
    pub base: Option<&'a Invocation>,
    pub new: Option<&'a Invocation>,
}

impl ReproScript<'_> {
    pub fn render(&self) -> String {
        let exe = shell_quote(&self.verif_exe.to_string_lossy()).into_owned();
        format!(
            r#"#!/bin/bash
DIR={DIR_PLACEHOLDER}
cd "${{DIR}}" || exit 1

{exe} subst "${{DIR}}" --output "${{DIR}}/out_repro.S" || exit 1
{compile} || exit 1

{base} > "${{DIR}}/base_output.txt"

{new} > "${{DIR}}/new_output.txt"

{exe} normalize "${{DIR}}/base_output.txt"
{exe} normalize "${{DIR}}/new_output.txt"

exec diff "${{DIR}}/base_output.txt" "${{DIR}}/new_output.txt"
"#,
            compile = self.relocatable(self.compile),
            base = self.engine_lines(self.base),
            new = self.engine_lines(self.new),
        )
    }

    /// Writes the script into `path` and marks it executable.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.render())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(perms.mode() | 0o755);
            fs::set_permissions(path, perms)?;
        }
        Ok(())
    }

    fn engine_lines(&self, invocation: Option<&Invocation>) -> String {
        let Some(invocation) = invocation else {
            return "/bin/false".to_string();
        };
        let mut lines = String::new();
        for (key, value) in &invocation.env {
            lines.push_str(&format!("{key}={} \\\n", self.relocatable_word(value)));
        }
        lines.push_str(&self.relocatable(invocation));
        lines
    }

    /// Command line of `invocation` with the trial directory replaced by `"${DIR}"`.
    fn relocatable(&self, invocation: &Invocation) -> String {
        invocation
            .words()
            .map(|word| self.relocatable_word(&word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn relocatable_word(&self, word: &str) -> String {
        let dir = self.trial_dir.to_string_lossy();
        if dir.is_empty() || !word.contains(&*dir) {
            return shell_quote(word).into_owned();
        }
        word.split(&*dir)
            .map(|part| match part {
                "" => String::new(),
                part => shell_quote(part).into_owned(),
            })
            .collect::<Vec<_>>()
            .join("\"${DIR}\"")
    }
}

/// Points the script at `dir`, its final location.
pub fn patch_placeholder(script: &Path, dir: &Path) -> io::Result<()> {
    let text = fs::read_to_string(script)?;
    fs::write(
        script,
        text.replace(DIR_PLACEHOLDER, &shell_quote(&dir.to_string_lossy())),
    )
}
