use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Which sources a rule applies to.
#[derive(Clone, Copy)]
enum Scope {
    /// Every Rust file in the crate.
    All,
    /// Every Rust file except this script, whose rule patterns would match themselves.
    AllButBuildScript,
    /// Library code under `region/`, up to its `#[cfg(test)]` module.
    LibraryNonTest,
}

/// Which part of a matched line must hold the match.
#[derive(Clone, Copy)]
enum Region {
    Code,
    CodeOutsideStrings,
    Comment,
    PlainComment,
}

struct Rule {
    name: &'static str,
    pattern: &'static str,
    scope: Scope,
    region: Region,
    advice: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        name: "underscore-prefixed identifiers",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        scope: Scope::All,
        region: Region::CodeOutsideStrings,
        advice: "Use the binding or remove it; unused values are not silenced with a leading underscore.",
    },
    Rule {
        name: "lint allowances",
        pattern: r"#\s*!?\[\s*allow\s*\(",
        scope: Scope::All,
        region: Region::Code,
        advice: "The crate denies dead code and unused items; fix the cause instead of allowing the lint.",
    },
    Rule {
        name: "panicking unwraps in library code",
        pattern: r"\.(unwrap|expect)\(",
        scope: Scope::LibraryNonTest,
        region: Region::Code,
        advice: "Region, interval and config failures are returned as errors; propagate with `?`.",
    },
    Rule {
        name: "changelog words in comments",
        pattern: r"(//|/\*).*\b(FIXED|FIXES|FIX|CORRECTED|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)\b",
        scope: Scope::AllButBuildScript,
        region: Region::Comment,
        advice: "Comments describe the code as it is; history belongs in version control.",
    },
    Rule {
        name: "emphasis markers in plain comments",
        pattern: r"(//|/\*).*\*\*",
        scope: Scope::AllButBuildScript,
        region: Region::PlainComment,
        advice: "`**` is allowed in doc comments only.",
    },
];

/// Collects the matched lines of one file that fall in the rule's region.
struct LineCollector {
    region: Region,
    last_line: u64,
    violations: Vec<String>,
}

impl LineCollector {
    fn new(region: Region, last_line: u64) -> Self {
        Self {
            region,
            last_line,
            violations: Vec::new(),
        }
    }
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        if line_number > self.last_line {
            return Ok(false);
        }
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        let trimmed = line_text.trim_start();
        let is_comment = trimmed.starts_with("//") || trimmed.starts_with("/*");
        let is_doc = trimmed.starts_with("///") || trimmed.starts_with("//!");
        let keep = match self.region {
            Region::Code => !is_comment,
            Region::CodeOutsideStrings => !is_comment && !inside_string(line_text),
            Region::Comment => true,
            Region::PlainComment => !is_doc,
        };
        if keep {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

// A match between an odd-numbered pair of quotes sits in a string literal.
fn inside_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn rust_sources(scope: Scope) -> Vec<PathBuf> {
    let root = match scope {
        Scope::All | Scope::AllButBuildScript => ".",
        Scope::LibraryNonTest => "./region",
    };
    let skip_build_script = matches!(scope, Scope::AllButBuildScript);
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            let path = e.path();
            !path.starts_with("./target") && !path.starts_with("./examples")
        })
        .filter_map(|e| e.ok())
        .filter(|e| !(skip_build_script && e.file_name() == "build.rs"))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

// Line of the first `#[cfg(test)]`, or the whole file when there is none.
fn last_checked_line(path: &Path, scope: Scope) -> Result<u64, Box<dyn Error>> {
    let source = std::fs::read_to_string(path)?;
    let total = source.lines().count() as u64;
    match scope {
        Scope::All | Scope::AllButBuildScript => Ok(total),
        Scope::LibraryNonTest => Ok(source
            .lines()
            .position(|l| l.trim_start().starts_with("#[cfg(test)]"))
            .map_or(total, |i| i as u64)),
    }
}

fn check(rule: &Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();
    let mut report = String::new();
    for path in rust_sources(rule.scope) {
        let last_line = last_checked_line(&path, rule.scope)?;
        let mut collector = LineCollector::new(rule.region, last_line);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if !collector.violations.is_empty() {
            writeln!(report, "  {}:", path.display())?;
            for violation in &collector.violations {
                writeln!(report, "    {violation}")?;
            }
        }
    }
    if report.is_empty() {
        Ok(())
    } else {
        Err(format!("\n❌ ERROR: found {}:\n{report}\n⚠️ {}\n", rule.name, rule.advice).into())
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=region");
    println!("cargo:rerun-if-changed=cli");
    println!("cargo:rerun-if-changed=tests");
    println!("cargo:rerun-if-changed=benches");

    let mut failed = false;
    for rule in RULES {
        if let Err(e) = check(rule) {
            eprintln!("{e}");
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
}
