//! HuggingFace and ModelScope URL builders.
//!
//! Both hosts serve repository files over plain HTTPS paths, so no
//! directory listing or API round trip is needed.

use url::Url;

use super::{Resolved, ResolveError};

/// `https://huggingface.co/<repo>/resolve/main/<file>`
pub fn huggingface(
    repo: &str,
    file: &str,
    token: Option<String>,
) -> Result<Resolved, ResolveError> {
    repo_file_url("https://huggingface.co", repo, "main", file, token)
}

/// `https://modelscope.cn/models/<repo>/resolve/master/<file>`
pub fn modelscope(
    repo: &str,
    file: &str,
    token: Option<String>,
) -> Result<Resolved, ResolveError> {
    repo_file_url("https://modelscope.cn/models", repo, "master", file, token)
}

fn repo_file_url(
    base: &str,
    repo: &str,
    branch: &str,
    file: &str,
    token: Option<String>,
) -> Result<Resolved, ResolveError> {
    if repo.split('/').count() != 2 || repo.contains("..") {
        return Err(ResolveError::InvalidReference(repo.to_string()));
    }
    let url = Url::parse(&format!("{base}/{repo}/resolve/{branch}/{file}"))?;
    Ok(Resolved { url, token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huggingface_url() {
        let r = huggingface("TheBloke/Llama-2-7B-GGUF", "llama-2-7b.Q5_K_M.gguf", None).unwrap();
        assert_eq!(
            r.url.as_str(),
            "https://huggingface.co/TheBloke/Llama-2-7B-GGUF/resolve/main/llama-2-7b.Q5_K_M.gguf"
        );
        assert!(r.token.is_none());
    }

    #[test]
    fn test_modelscope_url() {
        let r = modelscope("qwen/Qwen2-7B-GGUF", "qwen2-7b-q4_k_m.gguf", Some("tok".into()))
            .unwrap();
        assert_eq!(
            r.url.as_str(),
            "https://modelscope.cn/models/qwen/Qwen2-7B-GGUF/resolve/master/qwen2-7b-q4_k_m.gguf"
        );
        assert_eq!(r.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_rejects_malformed_repo() {
        assert!(huggingface("not-a-repo", "f.gguf", None).is_err());
        assert!(huggingface("a/b/c", "f.gguf", None).is_err());
    }
}
