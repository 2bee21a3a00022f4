//! yt-dlp invocation.

use std::path::PathBuf;

use scyd_core::CommandBuilder;

/// Output template: optional artist, a dash when the artist is set, title,
/// extractor and track id.
const OUTPUT_TEMPLATE: &str =
    "%(artist)s%(artist& - )s%(title)s - [%(extractor)s] [%(track_id,id)s].%(ext)s";

const DOCKER_IMAGE: &str = "scyd";

/// Builds `yt-dlp` command lines that extract mp3 audio into the download
/// directory. In development the binary runs inside the `scyd` container
/// with the download directory mounted at the same path.
#[derive(Debug, Clone)]
pub struct YtDlpCommand {
    download_dir: PathBuf,
    in_docker: bool,
}

impl YtDlpCommand {
    pub fn new(download_dir: impl Into<PathBuf>, in_docker: bool) -> Self {
        Self { download_dir: download_dir.into(), in_docker }
    }
}

impl CommandBuilder for YtDlpCommand {
    fn build(&self, url: &str, extra_args: &[String]) -> Vec<String> {
        let dir = self.download_dir.display().to_string();
        let mut argv = Vec::with_capacity(24 + extra_args.len());

        if self.in_docker {
            argv.extend(
                ["docker", "run", "--rm", "-v"]
                    .into_iter()
                    .map(str::to_owned),
            );
            argv.push(format!("{dir}:{dir}"));
            argv.push(DOCKER_IMAGE.to_owned());
        }

        argv.push("yt-dlp".to_owned());
        argv.push("-o".to_owned());
        argv.push(self.download_dir.join(OUTPUT_TEMPLATE).display().to_string());
        argv.extend(
            [
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "0",
                "--embed-thumbnail",
                "--embed-metadata",
                "--windows-filenames",
                "--progress",
                "--newline",
                "--no-colors",
            ]
            .into_iter()
            .map(str::to_owned),
        );
        argv.extend(extra_args.iter().cloned());
        argv.push(url.to_owned());
        argv
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn production_runs_yt_dlp_directly() {
        let argv = YtDlpCommand::new("/downloads", false)
            .build("https://example.com/v", &["--no-playlist".to_owned()]);

        assert_eq!(argv[0], "yt-dlp");
        assert_eq!(argv[1], "-o");
        assert_eq!(argv[2], format!("/downloads/{OUTPUT_TEMPLATE}"));
        assert!(argv.contains(&"--newline".to_owned()));
        let n = argv.len();
        assert_eq!(argv[n - 2], "--no-playlist");
        assert_eq!(argv[n - 1], "https://example.com/v");
    }

    #[test]
    fn development_wraps_in_docker() {
        let argv = YtDlpCommand::new("/downloads", true).build("https://example.com/v", &[]);
        assert_eq!(
            &argv[..7],
            ["docker", "run", "--rm", "-v", "/downloads:/downloads", "scyd", "yt-dlp"]
        );
        assert_eq!(argv.last().unwrap(), "https://example.com/v");
    }
}
