use std::sync::LazyLock;

use regex::Regex;

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]+)""#).expect("static href pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub url: String,
    pub filename: String,
    pub compressed: bool,
    pub size: Option<u64>,
}

impl RemoteFile {
    pub fn new(dir_url: &str, filename: &str, size: Option<u64>) -> Self {
        let compressed = filename
            .rsplit('.')
            .next()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        Self {
            url: format!("{}/{}", dir_url.trim_end_matches('/'), filename),
            filename: filename.to_string(),
            compressed,
            size,
        }
    }

    // `ls -l`, HTML index or bare names.
    pub fn parse_listing<S: AsRef<str>>(dir_url: &str, lines: &[S]) -> Vec<RemoteFile> {
        let mut files = Vec::new();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() {
                continue;
            }
            if line.contains("href=") {
                for caps in HREF.captures_iter(line) {
                    let target = &caps[1];
                    if is_file_link(target) {
                        files.push(RemoteFile::new(dir_url, target, None));
                    }
                }
                continue;
            }
            let fields = line.split_whitespace().collect::<Vec<_>>();
            match fields.len() {
                1 if !line.starts_with('<') => files.push(RemoteFile::new(dir_url, fields[0], None)),
                n if n >= 9 && !fields[0].starts_with('d') => {
                    let size = fields[4].parse::<u64>().ok();
                    files.push(RemoteFile::new(dir_url, fields[8], size));
                }
                _ => {}
            }
        }
        files
    }
}

fn is_file_link(target: &str) -> bool {
    !target.is_empty()
        && !target.contains('/')
        && !target.starts_with('?')
        && !target.starts_with('#')
        && !target.starts_with("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIR: &str = "https://host/geo/series/GSE25nnn/GSE25935/matrix/";

    #[test]
    fn parses_ls_lines() {
        let files = RemoteFile::parse_listing(
            DIR,
            &["-r--r--r--   1 ftp      anonymous 52831430 Dec 28 07:34 GSE25935_series_matrix.txt.gz"],
        );
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "GSE25935_series_matrix.txt.gz");
        assert_eq!(files[0].size, Some(52831430));
        assert!(files[0].compressed);
        assert_eq!(
            files[0].url,
            "https://host/geo/series/GSE25nnn/GSE25935/matrix/GSE25935_series_matrix.txt.gz"
        );
    }

    #[test]
    fn parses_html_index() {
        let lines = [
            r#"<a href="/geo/series/GSE25nnn/GSE25935/">Parent Directory</a>"#,
            r#"<a href="GSE25935-GPL1_series_matrix.txt.gz">GSE25935-GPL1_series_matrix.txt.gz</a> 2012-01-01 50M"#,
            r#"<a href="?C=M;O=A">Last modified</a>"#,
        ];
        let files = RemoteFile::parse_listing(DIR, &lines);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "GSE25935-GPL1_series_matrix.txt.gz");
        assert_eq!(files[0].size, None);
    }

    #[test]
    fn parses_bare_names() {
        let files = RemoteFile::parse_listing(DIR, &["a_series_matrix.txt", "", "total 12"]);
        assert_eq!(files.len(), 1);
        assert!(!files[0].compressed);
    }
}
