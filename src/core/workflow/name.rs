//! Deterministic, length-bounded resource name generation.

use rand::Rng;

const ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_NAME_LEN: usize = 64;

/// Generate a short random workflow id token.
pub fn rand_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char)
        .collect()
}

/// Decorate a resource name as `<name>-<workflow name>-<workflow id>`,
/// bounded to 64 characters. The workflow-name middle is truncated first,
/// then the id tail. Underscores are normalized to hyphens. Same inputs
/// always yield the same output.
pub fn gen_name(name: &str, wf_name: &str, wf_id: &str) -> String {
    let name = name.replace('_', "-");
    let wf_name = wf_name.replace('_', "-");
    let mut prefix = format!("{}-{}", name, wf_name);
    if prefix.len() > 57 {
        prefix.truncate(56);
    }
    let mut result = format!("{}-{}", prefix, wf_id);
    if result.len() > MAX_NAME_LEN {
        result.truncate(MAX_NAME_LEN - 1);
    }
    result.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_inputs_pass_through() {
        assert_eq!(gen_name("name", "wfname", "123456789"), "name-wfname-123456789");
    }

    #[test]
    fn long_names_are_truncated() {
        let tests = [
            (
                "super-long-name-really-long",
                "super-long-workflow-name-like-really-really-long",
                "1",
                "super-long-name-really-long-super-long-workflow-name-lik-1",
            ),
            (
                "super-long-name-really-long",
                "super-long-workflow-name-like-really-really-long",
                "123456789",
                "super-long-name-really-long-super-long-workflow-name-lik-123456",
            ),
        ];
        for (name, wf_name, wf_id, want) in tests {
            let got = gen_name(name, wf_name, wf_id);
            assert_eq!(got, want);
            assert!(got.len() <= 64, "{} is longer than 64 chars", got);
        }
    }

    #[test]
    fn underscores_become_hyphens() {
        assert_eq!(gen_name("my_disk", "wf_name", "abc12"), "my-disk-wf-name-abc12");
    }

    #[test]
    fn ids_have_requested_length() {
        let id = rand_id(5);
        assert_eq!(id.len(), 5);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
