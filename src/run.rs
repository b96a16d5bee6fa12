use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::anthropic::AnthropicClient;
use crate::collect::{CollectOptions, PathScope};
use crate::config::{AppConfig, Cli};
use crate::diff::FileDiff;
use crate::error::ReviewError;
use crate::git::{DiffScope, GitCli, SourceControl, find_repo_root};
use crate::instruction::{self, FileSource, HttpSource, Instruction, InstructionSource};
use crate::output::{Console, Style};
use crate::prompt::{Layout, ReviewTarget};
use crate::review::{InferenceClient, ReviewResponse, ReviewSettings, Reviewer};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Summary {
    reviewed: usize,
    unavailable: usize,
    unchanged: usize,
}

impl Summary {
    fn report<W: Write>(&self, console: &mut Console<W>) {
        let style = if self.unavailable == 0 {
            Style::Success
        } else {
            Style::Warning
        };
        let mut text = format!("Reviewed {} file(s).", self.reviewed);
        if self.unavailable > 0 {
            text.push_str(&format!(" {} review(s) unavailable.", self.unavailable));
        }
        if self.unchanged > 0 {
            text.push_str(&format!(" {} file(s) without changes.", self.unchanged));
        }
        console.line(style, &text);
    }
}

pub fn run<W: Write>(cli: &Cli, config: &AppConfig, console: &mut Console<W>) -> Result<()> {
    let api_key = config
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or(ReviewError::MissingApiKey)?;

    let scope = PathScope::new(
        &cli.paths,
        &CollectOptions {
            ignore: config.ignore.clone(),
            include_hidden: config.include_hidden,
            respect_gitignore: config.respect_gitignore,
        },
    )?;
    let candidates = scope.collect();
    if candidates.is_empty() {
        return Err(ReviewError::NoFiles.into());
    }
    log::info!("{} candidate file(s) under the given paths", candidates.len());

    let start = start_dir(&cli.paths[0]);
    let root = find_repo_root(&start).ok_or_else(|| ReviewError::NoRepository {
        path: start.clone(),
    })?;
    log::debug!("repository root: {}", root.display());
    let git = GitCli::new(root);

    let active = check_branches(&git, &config.branch, config.sync)?;
    let (in_scope, out_of_scope) = partition_changes(&git, &config.branch, &scope)?;
    if in_scope.is_empty() {
        console.line(
            Style::Warning,
            &format!(
                "No changes to review between {active} and {}.",
                config.branch
            ),
        );
        return Ok(());
    }
    console.line(
        Style::Progress,
        &format!("Changed files: {}", in_scope.join(", ")),
    );

    let timeout = config.timeout_secs.map(Duration::from_secs);
    let client = AnthropicClient::new(api_key, config.api_url.clone(), timeout)?;
    let reviewer = Reviewer::new(
        client,
        resolve_instruction(config, timeout),
        ReviewSettings {
            layout: if config.cxml {
                Layout::Cxml
            } else {
                Layout::Plain
            },
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        },
    );
    log::debug!(
        "system prompt: {} bytes ({:?})",
        reviewer.instruction().text.len(),
        reviewer.instruction().provenance
    );

    let summary = if cli.whole {
        let mut exclude = config.lockfiles.clone();
        exclude.extend(out_of_scope);
        review_whole(&git, &reviewer, &config.branch, &in_scope, exclude, console)?
    } else {
        review_each(&git, &reviewer, &config.branch, &in_scope, console)?
    };
    summary.report(console);
    Ok(())
}

fn start_dir(first: &Path) -> PathBuf {
    if first.is_dir() {
        return first.to_path_buf();
    }
    match first.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Validates the branch pair and, when asked, merges `branch` into the active one.
/// Returns the active branch.
fn check_branches(scm: &dyn SourceControl, branch: &str, sync: bool) -> Result<String> {
    if !scm.branch_exists(branch) {
        return Err(ReviewError::BranchMissing {
            branch: branch.to_string(),
        }
        .into());
    }
    let active = scm
        .current_branch()
        .ok_or(ReviewError::IndeterminateBranch)?;
    if active == branch {
        return Err(ReviewError::SameBranch { branch: active }.into());
    }
    if sync {
        if !scm.is_clean()? {
            return Err(ReviewError::DirtyWorkingTree.into());
        }
        log::info!("syncing {branch} into {active}");
        scm.sync(branch, &active)?;
    }
    Ok(active)
}

/// Splits the changed files into those under the given paths and the rest.
fn partition_changes(
    scm: &dyn SourceControl,
    branch: &str,
    scope: &PathScope,
) -> Result<(Vec<String>, Vec<String>)> {
    let changed = scm.changed_files(branch)?;
    log::info!("{} file(s) differ from {branch}", changed.len());
    Ok(changed
        .into_iter()
        .partition(|path| scope.contains(&scm.root().join(path))))
}

fn resolve_instruction(config: &AppConfig, timeout: Option<Duration>) -> Instruction {
    let local = config.system_prompt_file.clone().map(FileSource::new);
    let remote = HttpSource::new(config.prompt_url.clone(), timeout);
    let mut sources: Vec<&dyn InstructionSource> = Vec::new();
    if let Some(local) = &local {
        sources.push(local);
    }
    sources.push(&remote);
    instruction::resolve(&sources)
}

fn review_each<C: InferenceClient, W: Write>(
    scm: &dyn SourceControl,
    reviewer: &Reviewer<C>,
    branch: &str,
    files: &[String],
    console: &mut Console<W>,
) -> Result<Summary> {
    let mut summary = Summary::default();
    for path in files {
        let diff = scm.diff(branch, &DiffScope::File(path.clone()))?;
        if diff.trim().is_empty() {
            console.line(Style::Warning, &format!("No changes in {path}, skipping."));
            summary.unchanged += 1;
            continue;
        }

        let file = FileDiff::new(path.clone(), diff);
        let stats = file.stats();
        console.line(
            Style::Warning,
            &format!("Reviewing file: {path} (+{} -{})", stats.added, stats.removed),
        );
        let target = ReviewTarget::File {
            branch: branch.to_string(),
            file,
        };
        match stream_review(reviewer, &target, console) {
            Ok(_) => summary.reviewed += 1,
            Err(err) => {
                console.error(&format!("review unavailable for {path}: {err:#}"));
                summary.unavailable += 1;
            }
        }
    }
    Ok(summary)
}

fn review_whole<C: InferenceClient, W: Write>(
    scm: &dyn SourceControl,
    reviewer: &Reviewer<C>,
    branch: &str,
    files: &[String],
    exclude: Vec<String>,
    console: &mut Console<W>,
) -> Result<Summary> {
    let files: Vec<String> = files
        .iter()
        .filter(|f| !exclude.contains(f))
        .cloned()
        .collect();
    let diff = scm.diff(branch, &DiffScope::Whole { exclude })?;
    if diff.trim().is_empty() || files.is_empty() {
        console.line(
            Style::Warning,
            &format!("No reviewable changes against {branch}."),
        );
        return Ok(Summary::default());
    }

    let count = files.len();
    let target = ReviewTarget::ChangeSet {
        branch: branch.to_string(),
        files,
        diff,
    };
    log::debug!("change set diff is {} bytes", target.diff_text().len());
    console.line(Style::Warning, &format!("Reviewing {}", target.label()));
    let mut summary = Summary::default();
    match stream_review(reviewer, &target, console) {
        Ok(_) => summary.reviewed = count,
        Err(err) => {
            console.error(&format!("review unavailable: {err:#}"));
            summary.unavailable = count;
        }
    }
    Ok(summary)
}

/// Prints segments as they arrive, with a spinner until the first one.
fn stream_review<C: InferenceClient, W: Write>(
    reviewer: &Reviewer<C>,
    target: &ReviewTarget,
    console: &mut Console<W>,
) -> Result<ReviewResponse> {
    let label = target.label();
    let spinner = console.spinner(format!("Waiting for review of {label}"));
    let mut started = false;
    let result = reviewer.review(target, &mut |segment: &str| {
        if !started {
            spinner.finish_and_clear();
            console.line(Style::Success, &format!("Review for {label}:"));
            started = true;
        }
        console.write(Style::Info, segment);
    });
    spinner.finish_and_clear();

    if started {
        console.write(Style::Default, "\n\n");
    }
    let response = result?;
    log::debug!(
        "{} segment(s), {} bytes received for {label}",
        response.segments().len(),
        response.text().len()
    );
    if response.is_empty() {
        console.line(Style::Warning, &format!("Empty review for {label}."));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::git::testing::init_repo_with_feature;
    use crate::review::testing::ScriptedClient;

    struct FakeScm {
        root: PathBuf,
        branches: Vec<&'static str>,
        current: Option<&'static str>,
        clean: bool,
        syncs: RefCell<Vec<(String, String)>>,
    }

    impl FakeScm {
        fn on(current: Option<&'static str>) -> Self {
            Self {
                root: PathBuf::from("/repo"),
                branches: vec!["main", "feature"],
                current,
                clean: true,
                syncs: RefCell::new(Vec::new()),
            }
        }
    }

    impl SourceControl for FakeScm {
        fn root(&self) -> &Path {
            &self.root
        }

        fn current_branch(&self) -> Option<String> {
            self.current.map(str::to_string)
        }

        fn branch_exists(&self, name: &str) -> bool {
            self.branches.contains(&name)
        }

        fn is_clean(&self) -> Result<bool> {
            Ok(self.clean)
        }

        fn sync(&self, target: &str, active: &str) -> Result<()> {
            self.syncs
                .borrow_mut()
                .push((target.to_string(), active.to_string()));
            Ok(())
        }

        fn diff(&self, _branch: &str, _scope: &DiffScope) -> Result<String> {
            Ok(String::new())
        }

        fn changed_files(&self, _branch: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn review_error(err: anyhow::Error) -> ReviewError {
        err.downcast::<ReviewError>().unwrap()
    }

    fn reviewer(client: &ScriptedClient, layout: Layout) -> Reviewer<&ScriptedClient> {
        Reviewer::new(
            client,
            Instruction::fallback(),
            ReviewSettings {
                layout,
                model: "claude-3-5-sonnet-20240620".into(),
                max_tokens: 4000,
            },
        )
    }

    fn output(console: Console<Vec<u8>>) -> String {
        String::from_utf8(console.into_inner()).unwrap()
    }

    fn config() -> AppConfig {
        AppConfig {
            api_key: Some("sk-test".into()),
            branch: "main".into(),
            model: "claude-3-5-sonnet-20240620".into(),
            max_tokens: 4000,
            api_url: "http://127.0.0.1:9".into(),
            prompt_url: "http://127.0.0.1:9/prompt.xml".into(),
            system_prompt_file: None,
            ignore: Vec::new(),
            lockfiles: vec!["package-lock.json".into(), "yarn.lock".into()],
            include_hidden: false,
            respect_gitignore: false,
            cxml: false,
            sync: false,
            timeout_secs: Some(2),
        }
    }

    fn cli(paths: &[&Path]) -> Cli {
        let mut args: Vec<String> = vec!["branch-review".into()];
        args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        <Cli as clap::Parser>::try_parse_from(args).unwrap()
    }

    #[test]
    fn missing_comparison_branch_is_reported() {
        let scm = FakeScm::on(Some("feature"));
        let err = check_branches(&scm, "develop", true).unwrap_err();
        assert!(matches!(
            review_error(err),
            ReviewError::BranchMissing { branch } if branch == "develop"
        ));
        assert!(scm.syncs.borrow().is_empty());
    }

    #[test]
    fn same_branch_never_syncs() {
        let scm = FakeScm::on(Some("main"));
        let err = check_branches(&scm, "main", true).unwrap_err();
        assert_eq!(
            review_error(err).to_string(),
            "Active branch and specified branch are the same: main"
        );
        assert!(scm.syncs.borrow().is_empty());
    }

    #[test]
    fn detached_head_is_indeterminate() {
        let scm = FakeScm::on(None);
        let err = check_branches(&scm, "main", false).unwrap_err();
        assert!(matches!(review_error(err), ReviewError::IndeterminateBranch));
    }

    #[test]
    fn dirty_tree_blocks_sync() {
        let mut scm = FakeScm::on(Some("feature"));
        scm.clean = false;
        let err = check_branches(&scm, "main", true).unwrap_err();
        assert!(matches!(review_error(err), ReviewError::DirtyWorkingTree));
        assert!(scm.syncs.borrow().is_empty());

        // Without --sync the tree state does not matter.
        assert_eq!(check_branches(&scm, "main", false).unwrap(), "feature");
    }

    #[test]
    fn sync_merges_comparison_into_active() {
        let scm = FakeScm::on(Some("feature"));
        assert_eq!(check_branches(&scm, "main", true).unwrap(), "feature");
        assert_eq!(
            *scm.syncs.borrow(),
            vec![("main".to_string(), "feature".to_string())]
        );
    }

    #[test]
    fn start_dir_uses_directory_or_parent() {
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("a.py");
        std::fs::write(&file, "").unwrap();
        assert_eq!(start_dir(td.path()), td.path());
        assert_eq!(start_dir(&file), td.path());
        assert_eq!(start_dir(Path::new("a.py")), PathBuf::from("."));
    }

    #[test]
    fn changes_outside_given_paths_are_left_out() {
        let td = init_repo_with_feature();
        let root = std::fs::canonicalize(td.path()).unwrap();
        let git = GitCli::new(root.clone());
        let scope = PathScope::new(&[root.join("src")], &CollectOptions::default()).unwrap();
        let (in_scope, out_of_scope) = partition_changes(&git, "main", &scope).unwrap();
        assert_eq!(in_scope, vec!["src/app.py", "src/util.py"]);
        assert_eq!(out_of_scope, vec!["package-lock.json"]);
    }

    #[test]
    fn non_ascii_change_is_in_scope_and_reviewed() {
        let td = init_repo_with_feature();
        crate::git::testing::write(td.path(), "src/caf\u{e9}.py", "x = 1\n");
        crate::git::testing::commit_all(td.path(), "accented file");
        let root = std::fs::canonicalize(td.path()).unwrap();
        let git = GitCli::new(root.clone());
        let scope = PathScope::new(&[root.join("src")], &CollectOptions::default()).unwrap();

        let (in_scope, _) = partition_changes(&git, "main", &scope).unwrap();
        assert!(in_scope.contains(&"src/caf\u{e9}.py".to_string()));

        let client = ScriptedClient::replying(&["ok"]);
        let mut console = Console::plain(Vec::new());
        let files = vec!["src/caf\u{e9}.py".to_string()];
        let summary =
            review_each(&git, &reviewer(&client, Layout::Plain), "main", &files, &mut console)
                .unwrap();
        assert_eq!(summary.reviewed, 1);
        assert!(output(console).contains("Reviewing file: src/caf\u{e9}.py (+1 -0)"));
    }

    #[test]
    fn reviews_each_changed_file_in_order() {
        let td = init_repo_with_feature();
        let git = GitCli::new(std::fs::canonicalize(td.path()).unwrap());
        let client = ScriptedClient::replying(&["Looks ", "good"]);
        let mut console = Console::plain(Vec::new());

        let files = vec!["src/app.py".to_string(), "src/util.py".to_string()];
        let summary =
            review_each(&git, &reviewer(&client, Layout::Plain), "main", &files, &mut console)
                .unwrap();
        assert_eq!(
            summary,
            Summary {
                reviewed: 2,
                ..Default::default()
            }
        );

        let out = output(console);
        let first = out.find("Reviewing file: src/app.py (+1 -1)").unwrap();
        let second = out.find("Reviewing file: src/util.py (+2 -0)").unwrap();
        assert!(first < second);
        assert!(out.contains("Review for src/app.py:\nLooks good\n\n"));

        let requests = client.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert!(requests[0]
            .content
            .starts_with("# INPUT\n$> git --no-pager diff main src/app.py\n"));
        assert!(requests[0].content.contains("+print('hello, world')"));
        assert!(!requests[0].content.contains("util.py"));
        assert!(requests[1].content.ends_with("File being reviewed: src/util.py"));
    }

    #[test]
    fn failed_review_is_counted_and_run_continues() {
        let td = init_repo_with_feature();
        let git = GitCli::new(std::fs::canonicalize(td.path()).unwrap());
        let client = ScriptedClient {
            segments: vec!["ok"],
            fail_for: Some("src/app.py"),
            ..Default::default()
        };
        let mut console = Console::plain(Vec::new());

        let files = vec!["src/app.py".to_string(), "src/util.py".to_string()];
        let summary =
            review_each(&git, &reviewer(&client, Layout::Plain), "main", &files, &mut console)
                .unwrap();
        assert_eq!(summary.reviewed, 1);
        assert_eq!(summary.unavailable, 1);

        let out = output(console);
        assert!(out.contains("ERROR: review unavailable for src/app.py: service unavailable"));
        assert!(out.contains("Review for src/util.py:\nok"));
    }

    #[test]
    fn unchanged_file_is_skipped_without_a_request() {
        let td = init_repo_with_feature();
        let git = GitCli::new(std::fs::canonicalize(td.path()).unwrap());
        let client = ScriptedClient::replying(&["ok"]);
        let mut console = Console::plain(Vec::new());

        let files = vec!["README.md".to_string()];
        let summary =
            review_each(&git, &reviewer(&client, Layout::Plain), "main", &files, &mut console)
                .unwrap();
        assert_eq!(summary.unchanged, 1);
        assert!(client.requests.borrow().is_empty());
        assert!(output(console).contains("No changes in README.md, skipping."));
    }

    #[test]
    fn whole_change_set_is_one_request_without_lockfiles() {
        let td = init_repo_with_feature();
        let git = GitCli::new(std::fs::canonicalize(td.path()).unwrap());
        let client = ScriptedClient::replying(&["Looks good"]);
        let mut console = Console::plain(Vec::new());

        let files = vec![
            "package-lock.json".to_string(),
            "src/app.py".to_string(),
            "src/util.py".to_string(),
        ];
        let summary = review_whole(
            &git,
            &reviewer(&client, Layout::Cxml),
            "main",
            &files,
            vec!["package-lock.json".into(), "yarn.lock".into()],
            &mut console,
        )
        .unwrap();
        assert_eq!(summary.reviewed, 2);

        let requests = client.requests.borrow();
        assert_eq!(requests.len(), 1);
        let content = &requests[0].content;
        assert!(content.contains("<source>src/app.py</source>"));
        assert!(content.contains("<source>src/util.py</source>"));
        assert!(!content.contains("lockfileVersion"));
        assert!(output(console).contains("Reviewing 2 changed file(s)"));
    }

    #[test]
    fn summary_mentions_failures() {
        let mut console = Console::plain(Vec::new());
        Summary {
            reviewed: 2,
            unavailable: 1,
            unchanged: 0,
        }
        .report(&mut console);
        assert_eq!(
            output(console),
            "Reviewed 2 file(s). 1 review(s) unavailable.\n"
        );
    }

    #[test]
    fn missing_api_key_stops_before_anything_else() {
        let mut config = config();
        config.api_key = Some("  ".into());
        let mut console = Console::plain(Vec::new());
        let err = run(&cli(&[Path::new("does-not-exist")]), &config, &mut console).unwrap_err();
        assert!(matches!(review_error(err), ReviewError::MissingApiKey));
    }

    #[test]
    fn no_collectable_files_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let mut console = Console::plain(Vec::new());
        let err = run(&cli(&[td.path()]), &config(), &mut console).unwrap_err();
        assert!(matches!(review_error(err), ReviewError::NoFiles));
    }

    #[test]
    fn same_branch_run_fails_before_review() {
        let td = init_repo_with_feature();
        crate::git::testing::git(td.path(), &["checkout", "-q", "main"]);
        let mut console = Console::plain(Vec::new());
        let err = run(&cli(&[&td.path().join("src")]), &config(), &mut console).unwrap_err();
        assert!(matches!(review_error(err), ReviewError::SameBranch { .. }));
        assert!(output(console).is_empty());
    }

    #[test]
    fn unreachable_service_lists_changes_and_counts_failures() {
        let td = init_repo_with_feature();
        let mut console = Console::plain(Vec::new());
        run(&cli(&[&td.path().join("src")]), &config(), &mut console).unwrap();

        let out = output(console);
        assert!(out.starts_with("Changed files: src/app.py, src/util.py\n"));
        assert!(out.contains("ERROR: review unavailable for src/app.py"));
        assert!(out.ends_with("Reviewed 0 file(s). 2 review(s) unavailable.\n"));
    }

    #[test]
    fn no_changes_in_scope_is_a_warning() {
        let td = init_repo_with_feature();
        let dir = td.path().join("docs");
        crate::git::testing::write(td.path(), "docs/notes.md", "unchanged\n");
        let mut console = Console::plain(Vec::new());
        run(&cli(&[&dir]), &config(), &mut console).unwrap();
        assert_eq!(
            output(console),
            "No changes to review between feature and main.\n"
        );
    }
}
