use crate::errors::Result;
use std::path::Path;

/// Appends one line to a per-item log file (errors.txt / searched.txt) next
/// to the downloaded files.
pub async fn append_log_line(dir: &Path, filename: &str, line: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    tokio::fs::create_dir_all(dir).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(filename))
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Writes an m3u8 playlist listing the finished files in collection order.
/// Paths are stored relative to the playlist file where possible.
pub async fn write_m3u8(dir: &Path, filename: &str, files: &[std::path::PathBuf]) -> Result<()> {
    let mut body = String::from("#EXTM3U\n");
    for file in files {
        let entry = file
            .strip_prefix(dir)
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|_| file.clone());
        body.push_str(&entry.to_string_lossy());
        body.push('\n');
    }
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(format!("{}.m3u8", filename)), body).await?;
    Ok(())
}

/// Writes synced lyrics next to the audio file, same name with an `.lrc`
/// extension.
pub async fn write_lyrics_file(audio_path: &Path, lrc: &str) -> Result<()> {
    tokio::fs::write(audio_path.with_extension("lrc"), lrc).await?;
    Ok(())
}

/// Runs the user's post-download hook with path placeholders expanded.
/// Failures are logged, never fatal.
pub async fn run_user_command(template: &str, file: &Path, dir: &Path) {
    if template.trim().is_empty() {
        return;
    }
    let command = template
        .replace("%path%", &file.to_string_lossy())
        .replace("%folder%", &dir.to_string_lossy());
    let result = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => log::warn!("post-download command exited with {}", status),
        Err(e) => log::warn!("post-download command failed to start: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn m3u8_lists_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            dir.path().join("01 - First.mp3"),
            dir.path().join("02 - Second.mp3"),
        ];
        write_m3u8(dir.path(), "playlist", &files).await.unwrap();
        let body = std::fs::read_to_string(dir.path().join("playlist.m3u8")).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "01 - First.mp3");
        assert_eq!(lines[2], "02 - Second.mp3");
    }

    #[tokio::test]
    async fn log_lines_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        append_log_line(dir.path(), "errors.txt", "track one failed")
            .await
            .unwrap();
        append_log_line(dir.path(), "errors.txt", "track two failed")
            .await
            .unwrap();
        let body = std::fs::read_to_string(dir.path().join("errors.txt")).unwrap();
        assert_eq!(body, "track one failed\ntrack two failed\n");
        let _ = PathBuf::new();
    }

    #[tokio::test]
    async fn lyrics_file_sits_beside_the_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("01 - Song.mp3");
        write_lyrics_file(&audio, "[00:01.00]First line\n")
            .await
            .unwrap();
        let body = std::fs::read_to_string(dir.path().join("01 - Song.lrc")).unwrap();
        assert_eq!(body, "[00:01.00]First line\n");
    }
}
