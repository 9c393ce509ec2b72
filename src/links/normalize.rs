use url::Url;

/// Path segments that start an in-repository view on GitLab-style hosts
/// (file, commit, issue...), where repositories may sit in nested groups.
///
/// Everything from the first of these onwards is dropped so that deep links
/// collapse onto the repository itself.
const REPOSITORY_SUBPATHS: &[&str] = &[
    "-",
    "tree",
    "blob",
    "blame",
    "raw",
    "commit",
    "commits",
    "compare",
    "releases",
    "tags",
    "branches",
    "issues",
    "pull",
    "pulls",
    "merge_requests",
    "milestones",
    "labels",
    "wiki",
    "wikis",
    "actions",
    "archive",
    "graphs",
    "network",
    "security",
    "discussions",
    "projects",
];

/// GitHub repositories are always exactly `owner/name`.
const GITHUB_HOST: &str = "github.com";

/// First path segments on GitHub that name site pages, not owners.
const GITHUB_RESERVED_OWNERS: &[&str] = &[
    "orgs",
    "sponsors",
    "features",
    "topics",
    "marketplace",
    "settings",
    "collections",
    "explore",
    "login",
    "about",
    "pricing",
    "enterprise",
    "apps",
    "notifications",
];

/// Number of path segments a repository URL needs (owner and name).
const MIN_REPOSITORY_SEGMENTS: usize = 2;

/// Normalize a candidate URL into a canonical repository URL.
///
/// Returns `None` if the URL is not http(s), its host is not trusted, or its
/// path does not name a repository (e.g. `https://github.com/acme` or
/// `https://github.com/orgs/acme/repositories`).
///
/// The result always uses `https`, a lowercase host without `www.`, no query
/// or fragment, and no trailing `/` or `.git`.
#[must_use]
pub fn normalize_repository_url(candidate: &str, trusted_hosts: &[String]) -> Option<String> {
    let parsed = Url::parse(candidate).ok()?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }

    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if !is_trusted_host(&host, trusted_hosts) {
        return None;
    }

    let mut segments: Vec<&str> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();

    if host == GITHUB_HOST {
        if segments
            .first()
            .is_some_and(|owner| GITHUB_RESERVED_OWNERS.contains(&owner.to_lowercase().as_str()))
        {
            return None;
        }
        segments.truncate(MIN_REPOSITORY_SEGMENTS);
    } else if let Some(cut) = segments
        .iter()
        .skip(MIN_REPOSITORY_SEGMENTS)
        .position(|s| REPOSITORY_SUBPATHS.contains(s))
    {
        segments.truncate(cut + MIN_REPOSITORY_SEGMENTS);
    }

    if segments.len() < MIN_REPOSITORY_SEGMENTS {
        return None;
    }

    let last = segments.len() - 1;
    let name = segments[last].strip_suffix(".git").unwrap_or(segments[last]);
    if name.is_empty() {
        return None;
    }
    segments[last] = name;

    Some(format!("https://{host}/{}", segments.join("/")))
}

/// Check a host against the allow-list.
///
/// Only exact matches count (after dropping a leading `www.`), so
/// `docs.github.com` or `gist.github.com` are not code repositories.
#[must_use]
pub fn is_trusted_host(host: &str, trusted_hosts: &[String]) -> bool {
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    trusted_hosts.iter().any(|trusted| trusted.as_str() == host)
}

/// Trim a URL the way the archive service expects it: no surrounding
/// whitespace and no trailing `/`, `.` or `?`.
#[must_use]
pub fn clean_archive_url(url: &str) -> &str {
    url.trim().trim_end_matches(['/', '.', '?'])
}
