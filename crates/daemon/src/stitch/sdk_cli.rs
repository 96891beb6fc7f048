//! Stitcher backed by the stitching SDK's command-line front end.
//!
//! Builds one invocation per job with the fixed reliability settings
//! (template stitching, stabilization, direction lock, H.265) and relays
//! the percentage lines it prints on stdout as progress events.

use super::{
    ImageStitchRequest, StitchError, StitchProgress, Stitcher, VideoStitchRequest, STITCH_TYPE,
};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// Default name of the SDK front end on `PATH`.
pub const DEFAULT_PROGRAM: &str = "stitcherSDKDemo";

#[derive(Debug, Clone)]
pub struct SdkCliStitcher {
    program: PathBuf,
}

impl Default for SdkCliStitcher {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl SdkCliStitcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

fn push_common(cmd: &mut Command, inputs: &[PathBuf], output: &Path, width: u32, height: u32) {
    cmd.arg("-inputs").args(inputs);
    cmd.arg("-output").arg(output);
    cmd.arg("-output_size").arg(format!("{}x{}", width, height));
}

/// Build the video stitch command.
pub fn build_video_command(program: &Path, request: &VideoStitchRequest) -> Command {
    let mut cmd = Command::new(program);
    push_common(
        &mut cmd,
        &request.inputs,
        &request.output_path,
        request.width,
        request.height,
    );
    cmd.arg("-bitrate").arg(request.bitrate.to_string());

    if request.stabilization {
        cmd.arg("-enable_flowstate");
    }
    if request.direction_lock {
        cmd.arg("-enable_directionlock");
    }
    if request.h265 {
        cmd.arg("-enable_h265_encoder");
    }
    cmd.arg("-stitch_type").arg(STITCH_TYPE);

    if request.enable_acceleration {
        cmd.arg("-enable_cuda");
    }

    cmd
}

/// Build the image stitch command.
pub fn build_image_command(program: &Path, request: &ImageStitchRequest) -> Command {
    let mut cmd = Command::new(program);
    push_common(
        &mut cmd,
        &request.inputs,
        &request.output_path,
        request.width,
        request.height,
    );
    cmd.arg("-stitch_type").arg(STITCH_TYPE);
    cmd.arg("-image_processing_accel").arg(request.accel.as_arg());

    if request.fusion {
        cmd.arg("-enable_stitchfusion");
    }
    if request.enable_acceleration {
        cmd.arg("-enable_cuda");
    }

    cmd
}

/// Parse one stdout line of the front end.
///
/// Recognizes `... 42%` style progress lines and `... error: 7` style error
/// lines. Anything else is not progress.
pub fn parse_progress_line(line: &str) -> Option<StitchProgress> {
    let line = line.trim();

    if let Some(idx) = line.to_ascii_lowercase().find("error") {
        let code = line[idx + "error".len()..]
            .trim_start_matches(|c: char| c == ':' || c == '=' || c.is_whitespace());
        let digits: String = code
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '-')
            .collect();
        return digits.parse().ok().map(StitchProgress::Error);
    }

    let before = &line[..line.find('%')?];
    let start = before
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(0, |(i, c)| i + c.len_utf8());
    let percent: u32 = before[start..].parse().ok()?;
    Some(StitchProgress::Percent(percent.min(100) as u8))
}

fn status_to_result(status: ExitStatus) -> Result<(), StitchError> {
    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(StitchError::Failed(code)),
            None => Err(StitchError::Terminated),
        }
    }
}

/// Kills and reaps the child on drop unless it was waited on.
struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    fn wait(mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait();
        if status.is_ok() {
            self.armed = false;
        }
        status
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Relay progress from `stdout` until EOF, then wait for `child`.
///
/// A read error or a panic in `on_progress` kills the child before
/// returning, so no stitcher outlives its job.
fn supervise(
    child: Child,
    stdout: impl Read,
    on_progress: &mut dyn FnMut(StitchProgress),
) -> Result<(), StitchError> {
    let guard = ChildGuard::new(child);

    for line in BufReader::new(stdout).split(b'\n') {
        let line = line?;
        if let Some(progress) = parse_progress_line(&String::from_utf8_lossy(&line)) {
            on_progress(progress);
        }
    }

    status_to_result(guard.wait()?)
}

impl Stitcher for SdkCliStitcher {
    fn stitch_video(
        &self,
        request: &VideoStitchRequest,
        on_progress: &mut dyn FnMut(StitchProgress),
    ) -> Result<(), StitchError> {
        let mut child = build_video_command(&self.program, request)
            .stdout(Stdio::piped())
            .spawn()?;

        match child.stdout.take() {
            Some(stdout) => supervise(child, stdout, on_progress),
            None => supervise(child, io::empty(), on_progress),
        }
    }

    fn stitch_image(&self, request: &ImageStitchRequest) -> Result<bool, StitchError> {
        let status = build_image_command(&self.program, request)
            .stdout(Stdio::null())
            .status()?;

        match status_to_result(status) {
            Ok(()) => Ok(true),
            Err(StitchError::Io(e)) => Err(StitchError::Io(e)),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::ResolutionProfile;
    use crate::stitch::AccelType;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    fn video_request(accel: bool) -> VideoStitchRequest {
        VideoStitchRequest {
            inputs: vec![PathBuf::from("/in/VID_001.insv")],
            output_path: PathBuf::from("/out/.VID_001.partial.mp4"),
            width: 5760,
            height: 2880,
            bitrate: 50_000_000,
            enable_acceleration: accel,
            stabilization: true,
            direction_lock: true,
            h265: true,
        }
    }

    #[test]
    fn test_video_command_args() {
        let cmd = build_video_command(Path::new("stitcherSDKDemo"), &video_request(false));

        assert_eq!(cmd.get_program(), OsStr::new("stitcherSDKDemo"));
        assert_eq!(
            get_command_args(&cmd),
            vec![
                "-inputs",
                "/in/VID_001.insv",
                "-output",
                "/out/.VID_001.partial.mp4",
                "-output_size",
                "5760x2880",
                "-bitrate",
                "50000000",
                "-enable_flowstate",
                "-enable_directionlock",
                "-enable_h265_encoder",
                "-stitch_type",
                "template",
            ]
        );
    }

    #[test]
    fn test_video_command_with_acceleration() {
        let cmd = build_video_command(Path::new("stitcherSDKDemo"), &video_request(true));
        let args = get_command_args(&cmd);
        assert_eq!(args.last().map(String::as_str), Some("-enable_cuda"));
    }

    #[test]
    fn test_image_command_args() {
        let profile = ResolutionProfile::new(11904, 5952, "Insta360 X4");
        let req = ImageStitchRequest::new(
            Path::new("/in/IMG_001.insp"),
            Path::new("/out/.IMG_001.partial.jpg"),
            &profile,
            false,
        );
        let cmd = build_image_command(Path::new("/opt/sdk/bin/stitcherSDKDemo"), &req);

        assert_eq!(
            get_command_args(&cmd),
            vec![
                "-inputs",
                "/in/IMG_001.insp",
                "-output",
                "/out/.IMG_001.partial.jpg",
                "-output_size",
                "11904x5952",
                "-stitch_type",
                "template",
                "-image_processing_accel",
                "cpu",
            ]
        );
    }

    #[test]
    fn test_image_command_gpu_never_enables_fusion() {
        let profile = ResolutionProfile::new(7680, 3840, "Insta360 ONE");
        let req = ImageStitchRequest::new(
            Path::new("/in/a.insp"),
            Path::new("/out/a.jpg"),
            &profile,
            true,
        );
        assert_eq!(req.accel, AccelType::Gpu);

        let args = get_command_args(&build_image_command(Path::new("sdk"), &req));
        assert!(args.contains(&"gpu".to_string()));
        assert!(args.contains(&"-enable_cuda".to_string()));
        assert!(!args.contains(&"-enable_stitchfusion".to_string()));
    }

    #[test]
    fn test_parse_progress_lines() {
        assert_eq!(
            parse_progress_line("Progress: 42%"),
            Some(StitchProgress::Percent(42))
        );
        assert_eq!(
            parse_progress_line("  process = 100%  "),
            Some(StitchProgress::Percent(100))
        );
        assert_eq!(
            parse_progress_line("Stitching error: 3"),
            Some(StitchProgress::Error(3))
        );
        assert_eq!(parse_progress_line("loading model"), None);
        assert_eq!(parse_progress_line("%"), None);
        assert_eq!(parse_progress_line("error: unknown"), None);
    }

    #[test]
    fn test_parse_progress_with_multibyte_label() {
        assert_eq!(
            parse_progress_line("进度42%"),
            Some(StitchProgress::Percent(42))
        );
        assert_eq!(
            parse_progress_line("progress \u{FFFD}7%"),
            Some(StitchProgress::Percent(7))
        );
        assert_eq!(
            parse_progress_line(&String::from_utf8_lossy(b"stitch \xff\xfe63%")),
            Some(StitchProgress::Percent(63))
        );
        assert_eq!(parse_progress_line("进度%"), None);
    }

    /// Serves one progress line, then fails every read.
    #[derive(Default)]
    struct FailingStdout {
        served: bool,
    }

    impl Read for FailingStdout {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("pipe read failed"));
            }
            self.served = true;
            let line = b"Progress: 10%\n";
            buf[..line.len()].copy_from_slice(line);
            Ok(line.len())
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stdout_read_failure_kills_and_reaps_child() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let mut seen = Vec::new();

        let result = supervise(child, FailingStdout::default(), &mut |p| seen.push(p));

        assert!(matches!(result, Err(StitchError::Io(_))));
        assert_eq!(seen, vec![StitchProgress::Percent(10)]);
        assert!(!Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_supervise_relays_progress_and_exit_status() {
        let mut child = Command::new("sh")
            .args(["-c", "echo 'Progress: 50%'; echo 'Progress: 100%'; exit 3"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut seen = Vec::new();

        let result = supervise(child, stdout, &mut |p| seen.push(p));

        assert!(matches!(result, Err(StitchError::Failed(3))));
        assert_eq!(
            seen,
            vec![StitchProgress::Percent(50), StitchProgress::Percent(100)]
        );
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let stitcher = SdkCliStitcher::new("/nonexistent/stitcher-binary");
        let result = stitcher.stitch_video(&video_request(false), &mut |_| {});
        assert!(matches!(result, Err(StitchError::Io(_))));
    }

    proptest! {
        #[test]
        fn prop_percent_lines_parse(p in 0u32..1000) {
            let parsed = parse_progress_line(&format!("Progress: {}%", p));
            prop_assert_eq!(parsed, Some(StitchProgress::Percent(p.min(100) as u8)));
        }

        #[test]
        fn prop_output_size_arg(w in 1u32..20000, h in 1u32..10000, bitrate in 1u64..200_000_000) {
            let mut req = video_request(false);
            req.width = w;
            req.height = h;
            req.bitrate = bitrate;
            let args = get_command_args(&build_video_command(Path::new("sdk"), &req));

            let size = args.iter().position(|a| a == "-output_size").unwrap();
            prop_assert_eq!(&args[size + 1], &format!("{}x{}", w, h));
            let rate = args.iter().position(|a| a == "-bitrate").unwrap();
            prop_assert_eq!(&args[rate + 1], &bitrate.to_string());
        }
    }
}
