//! Component tagging from changed file paths
//!
//! Derives ranked subsystem tags from the directory prefixes of the files a
//! change touches. The heuristic is deterministic: identical input always
//! yields identical, identically ordered output.
//!
//! Weighting:
//! - every directory prefix scores `occurrences × depth × DEPTH_WEIGHT`
//! - a prefix naming the child of a conventional directory (`components/Foo`,
//!   `services/billing`) gets `STRUCTURAL_BONUS` per matching file
//! - the directory containing a file whose name encodes its role
//!   (`user.controller.ts`, `BillingService.java`) gets `ROLE_SUFFIX_BONUS`

use crate::evidence::ComponentTag;
use std::collections::HashMap;

/// Maximum number of tags returned
pub const MAX_TAGS: usize = 10;

const DEPTH_WEIGHT: usize = 2;
const STRUCTURAL_BONUS: usize = 6;
const ROLE_SUFFIX_BONUS: usize = 4;

/// Directory names whose children are usually meaningful subsystems
const STRUCTURAL_SEGMENTS: &[&str] = &[
    "components",
    "controllers",
    "services",
    "routes",
    "models",
    "api",
    "handlers",
    "modules",
    "pages",
    "views",
];

/// File name infixes that mark an architectural role
const ROLE_INFIXES: &[&str] = &[
    ".controller.",
    ".service.",
    ".module.",
    ".resolver.",
    ".handler.",
    ".model.",
    ".store.",
];

/// File stem suffixes that mark an architectural role
const ROLE_STEM_SUFFIXES: &[&str] = &[
    "Controller",
    "Service",
    "Repository",
    "Handler",
    "_controller",
    "_service",
    "_repository",
    "_handler",
];

struct Candidate {
    name: String,
    depth: usize,
    occurrences: usize,
    bonus: usize,
}

impl Candidate {
    fn weight(&self) -> usize {
        self.occurrences * self.depth * DEPTH_WEIGHT + self.bonus
    }
}

/// Rank the component tags for a list of changed file paths
pub fn tag_components<S: AsRef<str>>(paths: &[S]) -> Vec<ComponentTag> {
    // Candidates stay in first-seen order so the stable sort breaks ties by it
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for path in paths {
        let segments: Vec<&str> = path
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        if segments.len() < 2 {
            continue;
        }

        let dir_count = segments.len() - 1;

        for depth in 1..=dir_count {
            let slot = candidate_slot(&mut candidates, &mut index, &segments, depth);
            candidates[slot].occurrences += 1;
        }

        for (i, segment) in segments.iter().enumerate().take(dir_count) {
            if i + 1 < dir_count && is_structural(segment) {
                let slot = candidate_slot(&mut candidates, &mut index, &segments, i + 2);
                candidates[slot].bonus += STRUCTURAL_BONUS;
            }
        }

        if has_role_suffix(segments[dir_count]) {
            let slot = candidate_slot(&mut candidates, &mut index, &segments, dir_count);
            candidates[slot].bonus += ROLE_SUFFIX_BONUS;
        }
    }

    candidates.sort_by(|a, b| b.weight().cmp(&a.weight()));

    candidates
        .into_iter()
        .take(MAX_TAGS)
        .map(|c| ComponentTag {
            name: c.name,
            occurrence_count: c.occurrences,
            depth: c.depth,
        })
        .collect()
}

fn candidate_slot(
    candidates: &mut Vec<Candidate>,
    index: &mut HashMap<String, usize>,
    segments: &[&str],
    depth: usize,
) -> usize {
    let name = segments[..depth].join("/");
    if let Some(&slot) = index.get(&name) {
        return slot;
    }

    candidates.push(Candidate {
        name: name.clone(),
        depth,
        occurrences: 0,
        bonus: 0,
    });
    index.insert(name, candidates.len() - 1);
    candidates.len() - 1
}

fn is_structural(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    STRUCTURAL_SEGMENTS.contains(&lower.as_str())
}

fn has_role_suffix(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    if ROLE_INFIXES.iter().any(|infix| lower.contains(infix)) {
        return true;
    }

    let stem = file_name.split('.').next().unwrap_or(file_name);
    ROLE_STEM_SUFFIXES
        .iter()
        .any(|suffix| stem.len() > suffix.len() && stem.ends_with(suffix))
}
