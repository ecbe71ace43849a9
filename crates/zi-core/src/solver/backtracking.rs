use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use zi_schema::{
    Architecture, Command, Cpu, Dependency, FeedUri, ImplementationSelection, Importance,
    Requirements, Restriction, Selections, Stability, VersionRange,
};

use super::candidate::{Candidate, CandidateComparer, DefaultComparer};
use super::{Solution, Solver, SolverError};
use crate::config::{Config, NetworkLevel};
use crate::feeds::{FeedError, FeedProvider};
use crate::store::ImplementationStore;

/// Depth-first solver that backtracks over ranked candidates.
///
/// Outstanding demands are satisfied in order. For each interface the best
/// suitable candidate is tried first; if any later demand then fails, including
/// one from a sibling dependency, everything the candidate added is rolled back
/// and the next candidate is tried.
pub struct BacktrackingSolver {
    feeds: Arc<dyn FeedProvider>,
    store: Arc<dyn ImplementationStore>,
    comparer: Arc<dyn CandidateComparer>,
    network_use: NetworkLevel,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BacktrackingSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktrackingSolver")
            .field("store", &self.store.path())
            .field("network_use", &self.network_use)
            .finish_non_exhaustive()
    }
}

impl BacktrackingSolver {
    /// Solver reading feeds from `feeds` and checking the cache in `store`.
    pub fn new(
        feeds: Arc<dyn FeedProvider>,
        store: Arc<dyn ImplementationStore>,
        config: &Config,
    ) -> Self {
        Self {
            feeds,
            store,
            comparer: Arc::new(DefaultComparer {
                network_use: config.network_use,
                help_with_testing: config.help_with_testing,
            }),
            network_use: config.network_use,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the candidate ranking.
    pub fn with_comparer(mut self, comparer: Arc<dyn CandidateComparer>) -> Self {
        self.comparer = comparer;
        self
    }

    /// Abort solving when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Solver for BacktrackingSolver {
    fn solve(&self, requirements: &Requirements) -> Result<Solution, SolverError> {
        let mut failure = None;
        for effective in requirements.effective() {
            let mut run = Run::new(self, &effective);
            let command = effective.command.clone().filter(|c| !c.is_empty());
            if run.solve_root(&effective.interface, command.as_deref())? {
                let stale = run.consulted.iter().any(|uri| self.feeds.is_stale(uri));
                debug!(
                    interface = %effective.interface,
                    selections = run.selections.len(),
                    stale,
                    "Solved"
                );
                let mut selections = Selections::new(effective.interface.clone(), effective.command.clone());
                selections.implementations = run.selections;
                return Ok(Solution { selections, stale });
            }
            failure.get_or_insert(SolverError::Unsolvable {
                interface: effective.interface.clone(),
                reasons: run.notes,
            });
        }
        Err(failure.unwrap_or_else(|| SolverError::Unsolvable {
            interface: requirements.interface.clone(),
            reasons: Vec::new(),
        }))
    }
}

/// State to return to when a candidate is abandoned.
struct Mark {
    selections: usize,
    restrictions: usize,
    dropped: usize,
    commands: Vec<usize>,
}

/// Something the selections still have to provide.
#[derive(Clone)]
enum Demand {
    /// An implementation of `interface`, optionally with `command`.
    Interface {
        interface: FeedUri,
        command: Option<String>,
        importance: Importance,
        /// Selection (and command) declaring the dependency.
        owner: Option<(usize, Option<String>)>,
    },
    /// Command `name` of `candidates[index]`, selected at `pos`.
    Command {
        pos: usize,
        candidates: Rc<[Candidate]>,
        index: usize,
        name: String,
    },
}

impl Demand {
    fn dependency(dependency: &Dependency, pos: usize, command: Option<&str>) -> Self {
        Self::Interface {
            interface: dependency.interface.clone(),
            command: None,
            importance: dependency.importance,
            owner: Some((pos, command.map(str::to_string))),
        }
    }
}

/// One solve attempt for one effective set of requirements.
struct Run<'a> {
    solver: &'a BacktrackingSolver,
    requirements: &'a Requirements,
    system: Architecture,
    wants_source: bool,
    selections: Vec<ImplementationSelection>,
    restrictions: Vec<(FeedUri, VersionRange)>,
    /// Recommended dependencies given up on: owner, owner command, interface.
    dropped: Vec<(usize, Option<String>, FeedUri)>,
    candidates: HashMap<FeedUri, Rc<[Candidate]>>,
    consulted: BTreeSet<FeedUri>,
    notes: Vec<String>,
}

impl<'a> Run<'a> {
    fn new(solver: &'a BacktrackingSolver, requirements: &'a Requirements) -> Self {
        Self {
            solver,
            requirements,
            system: requirements.architecture,
            wants_source: requirements.source || requirements.architecture.cpu == Cpu::Source,
            selections: Vec::new(),
            restrictions: Vec::new(),
            dropped: Vec::new(),
            candidates: HashMap::new(),
            consulted: BTreeSet::new(),
            notes: Vec::new(),
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            selections: self.selections.len(),
            restrictions: self.restrictions.len(),
            dropped: self.dropped.len(),
            commands: self.selections.iter().map(|s| s.commands.len()).collect(),
        }
    }

    fn rollback(&mut self, mark: &Mark) {
        self.selections.truncate(mark.selections);
        self.restrictions.truncate(mark.restrictions);
        self.dropped.truncate(mark.dropped);
        for (selection, &len) in self.selections.iter_mut().zip(&mark.commands) {
            selection.commands.truncate(len);
        }
    }

    fn check_cancel(&self) -> Result<(), SolverError> {
        if self.solver.cancel.is_cancelled() {
            return Err(SolverError::Cancelled);
        }
        Ok(())
    }

    /// Ranked candidates for `interface`, including those of referenced feeds.
    fn candidates_for(&mut self, interface: &FeedUri) -> Result<Rc<[Candidate]>, SolverError> {
        if let Some(list) = self.candidates.get(interface) {
            return Ok(list.clone());
        }
        let feed = self.solver.feeds.get_feed(interface)?;
        self.consulted.insert(interface.clone());

        let mut implementations: Vec<_> = feed.implementations.clone();
        for reference in &feed.feeds {
            if &reference.source == interface || !reference.architecture.runs_on(self.system) {
                continue;
            }
            match self.solver.feeds.get_feed(&reference.source) {
                Ok(extra) => {
                    self.consulted.insert(reference.source.clone());
                    implementations.extend(extra.implementations.iter().cloned());
                }
                Err(e @ (FeedError::NotCached(_) | FeedError::Offline(_))) => return Err(e.into()),
                Err(e) => debug!(feed = %reference.source, error = %e, "Skipping extra feed"),
            }
        }

        let mut list: Vec<Candidate> = implementations
            .into_iter()
            .filter(|i| !i.id.starts_with("package:"))
            .enumerate()
            .map(|(order, implementation)| {
                let cached = match &implementation.local_path {
                    Some(path) => path.exists(),
                    None => {
                        !implementation.manifest_digest.is_empty()
                            && self.solver.store.contains(&implementation.manifest_digest)
                    }
                };
                Candidate {
                    implementation,
                    cached,
                    order,
                }
            })
            .collect();
        list.sort_by(|a, b| self.solver.comparer.compare(a, b));

        let list: Rc<[Candidate]> = list.into();
        self.candidates.insert(interface.clone(), list.clone());
        Ok(list)
    }

    /// Why `candidate` cannot be used for `interface`, if it cannot.
    fn unsuitable(
        &self,
        interface: &FeedUri,
        candidate: &Candidate,
        command: Option<&str>,
    ) -> Option<String> {
        let imp = &candidate.implementation;
        let is_root = interface == &self.requirements.interface;
        let wants_source = is_root && self.wants_source;

        if imp.is_source() && !wants_source {
            return Some("source code".into());
        }
        if wants_source && !imp.is_source() {
            return Some("not source code".into());
        }
        let system = if wants_source {
            Architecture::new(self.system.os, Cpu::Source)
        } else {
            self.system
        };
        if !imp.architecture.runs_on(system) {
            return Some(format!("incompatible architecture {}", imp.architecture));
        }
        if !self.requirements.languages.is_empty()
            && !imp.languages.is_empty()
            && !imp.languages.iter().any(|l| {
                self.requirements
                    .languages
                    .iter()
                    .any(|wanted| language_matches(l, wanted))
            })
        {
            return Some(format!("language {}", imp.languages.join(" ")));
        }
        if let Some(range) = self.requirements.extra_restrictions.get(interface) {
            if !range.matches(&imp.version) {
                return Some(format!("version {} excluded by {range}", imp.version));
            }
        }
        if imp.stability <= Stability::Buggy {
            return Some(format!("stability {}", imp.stability));
        }
        if let Some(command) = command {
            if imp.command(command).is_none() {
                return Some(format!("no command '{command}'"));
            }
        }
        if !candidate.cached && self.solver.network_use == NetworkLevel::Offline {
            return Some("not cached and network use is offline".into());
        }
        if let Some((_, range)) = self
            .restrictions
            .iter()
            .find(|(i, range)| i == interface && !range.matches(&imp.version))
        {
            return Some(format!("version {} excluded by restriction {range}", imp.version));
        }
        None
    }

    /// Version restrictions an implementation or command places on others.
    fn restrictions_of(
        &self,
        dependencies: &[Dependency],
        restrictions: &[Restriction],
    ) -> Vec<(FeedUri, VersionRange)> {
        let os = self.system.os;
        dependencies
            .iter()
            .filter(|d| d.applies_to(os) && !d.versions.is_empty())
            .map(|d| (d.interface.clone(), d.versions.clone()))
            .chain(
                restrictions
                    .iter()
                    .filter(|r| r.os.runs_on(os))
                    .map(|r| (r.interface.clone(), r.versions.clone())),
            )
            .collect()
    }

    /// Whether any restriction contradicts an existing selection.
    fn contradicts(&self, restrictions: &[(FeedUri, VersionRange)]) -> bool {
        restrictions.iter().any(|(interface, range)| {
            self.selections
                .iter()
                .any(|s| &s.interface == interface && !range.matches(&s.version))
        })
    }

    fn position(&self, interface: &FeedUri) -> Option<usize> {
        self.selections.iter().position(|s| &s.interface == interface)
    }

    /// Select `interface` and everything it needs.
    fn solve_root(&mut self, interface: &FeedUri, command: Option<&str>) -> Result<bool, SolverError> {
        let root = Demand::Interface {
            interface: interface.clone(),
            command: command.map(str::to_string),
            importance: Importance::Essential,
            owner: None,
        };
        if !self.satisfy(&[root])? {
            return Ok(false);
        }
        for (pos, command, interface) in std::mem::take(&mut self.dropped) {
            let selection = &mut self.selections[pos];
            let list = match command {
                Some(name) => match selection.commands.iter_mut().find(|c| c.name == name) {
                    Some(c) => &mut c.dependencies,
                    None => continue,
                },
                None => &mut selection.dependencies,
            };
            list.retain(|d| d.interface != interface);
        }
        Ok(true)
    }

    /// Satisfy `pending` in order, revisiting earlier choices when a later demand fails.
    ///
    /// Recommended dependencies that cannot be satisfied are dropped.
    fn satisfy(&mut self, pending: &[Demand]) -> Result<bool, SolverError> {
        let Some((demand, rest)) = pending.split_first() else {
            return Ok(true);
        };
        self.check_cancel()?;
        match demand {
            Demand::Interface {
                interface,
                command,
                importance,
                owner,
            } => {
                if self.satisfy_interface(interface, command.as_deref(), rest)? {
                    return Ok(true);
                }
                if *importance == Importance::Essential {
                    return Ok(false);
                }
                debug!(%interface, "Dropping unsatisfiable recommended dependency");
                let mark = self.mark();
                if let Some((pos, command)) = owner {
                    self.dropped.push((*pos, command.clone(), interface.clone()));
                }
                if self.satisfy(rest)? {
                    return Ok(true);
                }
                self.rollback(&mark);
                Ok(false)
            }
            Demand::Command {
                pos,
                candidates,
                index,
                name,
            } => self.satisfy_command(*pos, &candidates[*index], name, rest),
        }
    }

    fn satisfy_interface(
        &mut self,
        interface: &FeedUri,
        command: Option<&str>,
        rest: &[Demand],
    ) -> Result<bool, SolverError> {
        let candidates = self.candidates_for(interface)?;

        if let Some(pos) = self.position(interface) {
            let existing = &self.selections[pos];
            let Some(index) = candidates
                .iter()
                .position(|c| c.implementation.id == existing.id && c.implementation.version == existing.version)
            else {
                return Ok(false);
            };
            if self.unsuitable(interface, &candidates[index], command).is_some() {
                return Ok(false);
            }
            return match command {
                Some(name) if self.selections[pos].command(name).is_none() => {
                    let mut pending = vec![Demand::Command {
                        pos,
                        candidates: candidates.clone(),
                        index,
                        name: name.to_string(),
                    }];
                    pending.extend_from_slice(rest);
                    self.satisfy(&pending)
                }
                _ => self.satisfy(rest),
            };
        }

        let os = self.system.os;
        for (index, candidate) in candidates.iter().enumerate() {
            if let Some(reason) = self.unsuitable(interface, candidate, command) {
                trace!(%interface, id = %candidate.implementation.id, %reason, "Unsuitable");
                if interface == &self.requirements.interface {
                    self.notes
                        .push(format!("{} ({}): {reason}", candidate.implementation.version, candidate.implementation.id));
                }
                continue;
            }
            let imp = &candidate.implementation;
            let own = self.restrictions_of(&imp.dependencies, &imp.restrictions);
            if self.contradicts(&own) {
                continue;
            }

            let mark = self.mark();
            let pos = self.selections.len();
            let mut selection = ImplementationSelection::new(interface.clone(), imp);
            selection.dependencies.retain(|d| d.applies_to(os));
            self.selections.push(selection);
            self.restrictions.extend(own);

            let mut pending: Vec<Demand> = imp
                .dependencies
                .iter()
                .filter(|d| d.applies_to(os))
                .map(|d| Demand::dependency(d, pos, None))
                .collect();
            if let Some(name) = command {
                pending.push(Demand::Command {
                    pos,
                    candidates: candidates.clone(),
                    index,
                    name: name.to_string(),
                });
            }
            pending.extend_from_slice(rest);
            if self.satisfy(&pending)? {
                return Ok(true);
            }
            self.rollback(&mark);
            if interface == &self.requirements.interface {
                self.notes.push(format!(
                    "{} ({}): dependencies cannot be satisfied",
                    imp.version, imp.id
                ));
            }
        }
        Ok(false)
    }

    fn satisfy_command(
        &mut self,
        pos: usize,
        candidate: &Candidate,
        name: &str,
        rest: &[Demand],
    ) -> Result<bool, SolverError> {
        if self.selections[pos].command(name).is_some() {
            return self.satisfy(rest);
        }
        let Some(command) = candidate.implementation.command(name) else {
            return Ok(false);
        };
        let mut restrictions = self.restrictions_of(&command.dependencies, &command.restrictions);
        if let Some(runner) = &command.runner {
            if !runner.versions.is_empty() {
                restrictions.push((runner.interface.clone(), runner.versions.clone()));
            }
        }
        if self.contradicts(&restrictions) {
            return Ok(false);
        }

        let mark = self.mark();
        let os = self.system.os;
        let mut solved_command: Command = command.clone();
        solved_command.dependencies.retain(|d| d.applies_to(os));
        self.selections[pos].commands.push(solved_command);
        self.restrictions.extend(restrictions);

        let mut pending = Vec::new();
        if let Some(runner) = &command.runner {
            pending.push(Demand::Interface {
                interface: runner.interface.clone(),
                command: Some(runner.command_or_default().to_string()),
                importance: Importance::Essential,
                owner: None,
            });
        }
        pending.extend(
            command
                .dependencies
                .iter()
                .filter(|d| d.applies_to(os))
                .map(|d| Demand::dependency(d, pos, Some(name))),
        );
        pending.extend_from_slice(rest);
        if self.satisfy(&pending)? {
            return Ok(true);
        }
        self.rollback(&mark);
        Ok(false)
    }
}

/// `en` matches `en_GB` and vice versa.
fn language_matches(offered: &str, wanted: &str) -> bool {
    let base = |l: &str| l.split(['_', '-']).next().unwrap_or(l).to_lowercase();
    offered.eq_ignore_ascii_case(wanted) || base(offered) == base(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DirectoryStore;
    use std::sync::Mutex;
    use zi_schema::Feed;

    /// Feeds held in memory.
    #[derive(Default)]
    struct MemoryFeeds {
        feeds: Mutex<HashMap<FeedUri, Arc<Feed>>>,
    }

    impl MemoryFeeds {
        fn add(&self, uri: &str, body: &str) {
            let uri = FeedUri::parse(uri).unwrap();
            let xml = format!(
                r#"<interface xmlns="http://zero-install.sourceforge.net/2004/injector/interface" uri="{uri}"><name>{uri}</name>{body}</interface>"#
            );
            let feed = Feed::parse(&xml, &uri).unwrap();
            self.feeds.lock().unwrap().insert(uri, Arc::new(feed));
        }
    }

    impl FeedProvider for MemoryFeeds {
        fn get_feed(&self, uri: &FeedUri) -> Result<Arc<Feed>, FeedError> {
            self.feeds
                .lock()
                .unwrap()
                .get(uri)
                .cloned()
                .ok_or_else(|| FeedError::NotCached(uri.clone()))
        }

        fn is_stale(&self, _uri: &FeedUri) -> bool {
            false
        }
    }

    const APP: &str = "http://example.com/app.xml";
    const LIB: &str = "http://example.com/lib.xml";
    const PYTHON: &str = "http://example.com/python.xml";

    fn solver(feeds: MemoryFeeds) -> (tempfile::TempDir, BacktrackingSolver) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path().join("store")).unwrap();
        let solver = BacktrackingSolver::new(Arc::new(feeds), Arc::new(store), &Config::default());
        (dir, solver)
    }

    fn requirements() -> Requirements {
        Requirements::new(FeedUri::parse(APP).unwrap())
            .with_architecture("Linux-x86_64".parse().unwrap())
    }

    fn version_of(solution: &Solution, uri: &str) -> String {
        solution
            .selections
            .get(&FeedUri::parse(uri).unwrap())
            .unwrap()
            .version
            .to_string()
    }

    #[test]
    fn picks_newest_stable_with_dependencies() {
        let feeds = MemoryFeeds::default();
        feeds.add(
            APP,
            &format!(
                r#"<implementation id="sha1new=a1" version="1.0" stability="stable">
                     <command name="run" path="app"/>
                     <requires interface="{LIB}"/>
                   </implementation>
                   <implementation id="sha1new=a2" version="2.0" stability="stable">
                     <command name="run" path="app"/>
                     <requires interface="{LIB}" version="2.."/>
                   </implementation>"#
            ),
        );
        feeds.add(
            LIB,
            r#"<implementation id="sha1new=l1" version="1.5" stability="stable"/>
               <implementation id="sha1new=l2" version="2.1" stability="stable"/>"#,
        );
        let (_dir, solver) = solver(feeds);
        let solution = solver.solve(&requirements()).unwrap();

        assert_eq!(version_of(&solution, APP), "2.0");
        assert_eq!(version_of(&solution, LIB), "2.1");
        assert!(!solution.stale);
        let main = solution.selections.main_implementation().unwrap();
        assert!(main.command("run").is_some());
    }

    #[test]
    fn backtracks_when_dependency_cannot_be_met() {
        let feeds = MemoryFeeds::default();
        feeds.add(
            APP,
            &format!(
                r#"<implementation id="sha1new=a1" version="1.0" stability="stable">
                     <command name="run" path="app"/>
                     <requires interface="{LIB}" version="..!2"/>
                   </implementation>
                   <implementation id="sha1new=a2" version="2.0" stability="stable">
                     <command name="run" path="app"/>
                     <requires interface="{LIB}" version="3.."/>
                   </implementation>"#
            ),
        );
        feeds.add(LIB, r#"<implementation id="sha1new=l1" version="1.5" stability="stable"/>"#);
        let (_dir, solver) = solver(feeds);
        let solution = solver.solve(&requirements()).unwrap();

        assert_eq!(version_of(&solution, APP), "1.0");
        assert_eq!(solution.selections.implementations.len(), 2);
    }

    #[test]
    fn sibling_conflict_revisits_earlier_choice() {
        const TOOLS: &str = "http://example.com/tools.xml";
        let feeds = MemoryFeeds::default();
        feeds.add(
            APP,
            &format!(
                r#"<implementation id="sha1new=a1" version="1.0" stability="stable">
                     <command name="run" path="app"/>
                     <requires interface="{LIB}"/>
                     <requires interface="{TOOLS}"/>
                   </implementation>"#
            ),
        );
        feeds.add(
            LIB,
            r#"<implementation id="sha1new=l1" version="1.0" stability="stable"/>
               <implementation id="sha1new=l2" version="2.0" stability="stable"/>"#,
        );
        feeds.add(
            TOOLS,
            &format!(
                r#"<implementation id="sha1new=t1" version="1.0" stability="stable">
                     <requires interface="{LIB}" version="..!2"/>
                   </implementation>"#
            ),
        );
        let (_dir, solver) = solver(feeds);
        let solution = solver.solve(&requirements()).unwrap();

        assert_eq!(version_of(&solution, LIB), "1.0");
        assert_eq!(version_of(&solution, TOOLS), "1.0");
        assert_eq!(solution.selections.implementations.len(), 3);
    }

    #[test]
    fn respects_extra_restrictions_and_reports_reasons() {
        let feeds = MemoryFeeds::default();
        feeds.add(
            APP,
            r#"<implementation id="sha1new=a1" version="1.0" stability="stable"><command name="run" path="a"/></implementation>
               <implementation id="sha1new=a2" version="2.0" stability="buggy"><command name="run" path="a"/></implementation>"#,
        );
        let (_dir, solver) = solver(feeds);

        let pinned = requirements().with_versions("2..".parse().unwrap());
        let Err(SolverError::Unsolvable { reasons, .. }) = solver.solve(&pinned) else {
            panic!("expected unsolvable");
        };
        assert!(reasons.iter().any(|r| r.contains("stability buggy")));
        assert!(reasons.iter().any(|r| r.contains("1.0") && r.contains("excluded by 2..")));
    }

    #[test]
    fn runner_and_recommended_dependencies() {
        let feeds = MemoryFeeds::default();
        feeds.add(
            APP,
            &format!(
                r#"<implementation id="sha1new=a1" version="1.0" stability="stable">
                     <command name="run" path="main.py">
                       <runner interface="{PYTHON}" version="3.."/>
                     </command>
                     <requires interface="{LIB}" importance="recommended"/>
                   </implementation>"#
            ),
        );
        feeds.add(
            PYTHON,
            r#"<implementation id="sha1new=p2" version="2.7" stability="stable"><command name="run" path="python"/></implementation>
               <implementation id="sha1new=p3" version="3.12" stability="stable"><command name="run" path="python3"/></implementation>"#,
        );
        feeds.add(LIB, r#"<implementation id="sha1new=l1" version="1.0" arch="Windows-*" stability="stable"/>"#);
        let (_dir, solver) = solver(feeds);
        let solution = solver.solve(&requirements()).unwrap();

        assert_eq!(version_of(&solution, PYTHON), "3.12");
        let lib = FeedUri::parse(LIB).unwrap();
        assert!(!solution.selections.contains(&lib));
        let app = solution.selections.main_implementation().unwrap();
        assert!(app.dependencies.iter().all(|d| d.interface != lib));
        let python = solution.selections.get(&FeedUri::parse(PYTHON).unwrap()).unwrap();
        assert!(python.command("run").is_some());
    }

    #[test]
    fn every_dependency_has_exactly_one_selection() {
        let feeds = MemoryFeeds::default();
        feeds.add(
            APP,
            &format!(
                r#"<implementation id="sha1new=a1" version="1.0" stability="stable">
                     <command name="run" path="app"><requires interface="{PYTHON}"/></command>
                     <requires interface="{LIB}"/>
                   </implementation>"#
            ),
        );
        feeds.add(
            LIB,
            &format!(r#"<implementation id="sha1new=l1" version="1.0" stability="stable"><requires interface="{PYTHON}"/></implementation>"#),
        );
        feeds.add(PYTHON, r#"<implementation id="sha1new=p1" version="3.0" stability="stable"/>"#);
        let (_dir, solver) = solver(feeds);
        let selections = solver.solve(&requirements()).unwrap().selections;

        for selection in &selections.implementations {
            let deps = selection
                .dependencies
                .iter()
                .chain(selection.commands.iter().flat_map(|c| c.dependencies.iter()));
            for dep in deps {
                let count = selections
                    .implementations
                    .iter()
                    .filter(|s| s.interface == dep.interface)
                    .count();
                assert_eq!(count, 1, "{}", dep.interface);
            }
        }
    }

    #[test]
    fn missing_feed_is_reported_as_not_cached() {
        let feeds = MemoryFeeds::default();
        feeds.add(
            APP,
            &format!(
                r#"<implementation id="sha1new=a1" version="1.0" stability="stable">
                     <command name="run" path="app"/><requires interface="{LIB}"/>
                   </implementation>"#
            ),
        );
        let (_dir, solver) = solver(feeds);
        let err = solver.solve(&requirements()).unwrap_err();
        assert!(matches!(err, SolverError::Feed(FeedError::NotCached(uri)) if uri.as_str() == LIB));
    }

    #[test]
    fn cancellation_stops_the_solver() {
        let feeds = MemoryFeeds::default();
        feeds.add(APP, r#"<implementation id="sha1new=a1" version="1.0"><command name="run" path="a"/></implementation>"#);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_dir, solver) = solver(feeds);
        let solver = solver.with_cancellation(cancel);
        assert!(matches!(solver.solve(&requirements()), Err(SolverError::Cancelled)));
    }

    #[test]
    fn language_prefixes_match() {
        assert!(language_matches("en_GB", "en"));
        assert!(language_matches("de", "de_DE"));
        assert!(!language_matches("fr", "en_US"));
    }
}
