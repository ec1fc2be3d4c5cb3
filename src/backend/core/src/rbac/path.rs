//! Request path normalization for path-mode enforcement.
//!
//! Identifier segments at the end of nested collection paths are collapsed
//! into a wildcard so one grant covers every record:
//!
//! | Input               | Pattern             |
//! |---------------------|---------------------|
//! | `/users/5`          | `/users/5`          |
//! | `/users/5/roles`    | `/users/5/roles`    |
//! | `/users/5/roles/3`  | `/users/5/roles/*`  |

use super::models::WILDCARD;

/// Normalize a request path into a policy object pattern.
///
/// Surrounding `/` are trimmed and the path is split on `/`. When there are
/// more than two segments and the last one parses as an unsigned integer it
/// is replaced with `*` and the result is re-joined with a leading `/`.
/// Every other input is returned unchanged.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();

    match segments.split_last() {
        Some((last, init)) if segments.len() > 2 && last.parse::<u64>().is_ok() => {
            let mut pattern = String::with_capacity(trimmed.len() + 1);
            for segment in init {
                pattern.push('/');
                pattern.push_str(segment);
            }
            pattern.push('/');
            pattern.push_str(WILDCARD);
            pattern
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_paths_unchanged() {
        assert_eq!(normalize("/users/5"), "/users/5");
        assert_eq!(normalize("/users"), "/users");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_trailing_id_collapsed() {
        assert_eq!(normalize("/users/5/roles/3"), "/users/5/roles/*");
        assert_eq!(normalize("/api/users/42"), "/api/users/*");
        assert_eq!(normalize("users/5/roles/3/"), "/users/5/roles/*");
    }

    #[test]
    fn test_non_numeric_tail_unchanged() {
        assert_eq!(normalize("/users/5/roles"), "/users/5/roles");
        assert_eq!(normalize("/a/b/c"), "/a/b/c");
        assert_eq!(normalize("/a/b/-1"), "/a/b/-1");
        assert_eq!(normalize("/a/b/1.5"), "/a/b/1.5");
    }

    #[test]
    fn test_idempotent() {
        for input in [
            "/users/5/roles/3",
            "/users/5",
            "/a/b/c",
            "api/users/7/",
            "//x//9",
            "/api/roles/12",
        ] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input {input}");
        }
    }
}
