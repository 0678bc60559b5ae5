//! Running a plugin program for a single request.

use kmsplugin_core::{
    format::MethodArgs, Context, InitOptions, PluginArgs, PluginResp, PROTOCOL_VERSION,
};
use log::{debug, warn};
use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::error::{CmdError, Error};

/// How often a running plugin is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything a finished [`Cmd`] produced.
pub(crate) struct CmdOutput {
    pub(crate) stdout: Vec<u8>,
    pub(crate) error: Option<CmdError>,
}

impl CmdOutput {
    fn failed(error: CmdError) -> Self {
        CmdOutput {
            stdout: vec![],
            error: Some(error),
        }
    }
}

/// A runnable plugin invocation.
pub(crate) trait Cmd {
    /// Runs to completion, returning standard output and how the run ended.
    fn output(self: Box<Self>) -> CmdOutput;
}

/// Builds a [`Cmd`] from the context, standard input, program name and arguments.
pub(crate) type MakeCmd =
    Box<dyn Fn(&Context, Vec<u8>, &str, &[String]) -> Box<dyn Cmd> + Send + Sync>;

/// A plugin program run as a child process.
struct ProcessCmd {
    ctx: Context,
    stdin: Vec<u8>,
    command: Command,
}

pub(crate) fn process_cmd(
    ctx: &Context,
    stdin: Vec<u8>,
    name: &str,
    args: &[String],
) -> Box<dyn Cmd> {
    let mut command = Command::new(name);
    command.args(args);
    Box::new(ProcessCmd {
        ctx: ctx.clone(),
        stdin,
        command,
    })
}

/// Runs `f` on its own thread, delivering the result over a channel.
fn pipe_thread<T, F>(f: F) -> Receiver<io::Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone if the call was abandoned.
        let _ = tx.send(f());
    });
    rx
}

/// Waits for a pipe thread's result, giving up as soon as `ctx` is done.
///
/// A descendant of the plugin can hold a pipe open after the plugin itself exits, so
/// the pipes are not assumed to close promptly.
fn wait_for<T>(ctx: &Context, rx: &Receiver<io::Result<T>>) -> Result<T, CmdError> {
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(res) => return res.map_err(CmdError::Io),
            Err(RecvTimeoutError::Timeout) => ctx.check()?,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CmdError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "plugin pipe thread panicked",
                )))
            }
        }
    }
}

fn exit_error(status: ExitStatus) -> Option<CmdError> {
    match status.code() {
        Some(0) => None,
        Some(code) => Some(CmdError::Exit(code)),
        None => Some(CmdError::Exit(-1)),
    }
}

impl Cmd for ProcessCmd {
    fn output(self: Box<Self>) -> CmdOutput {
        let ProcessCmd {
            ctx,
            stdin,
            mut command,
        } = *self;

        let mut child = match command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return CmdOutput::failed(CmdError::Io(e)),
        };

        // The pipes are serviced on their own threads so that a plugin blocked on a full
        // pipe can't stall the wait below.
        let stdin_pipe = child.stdin.take();
        let writer = pipe_thread(move || match stdin_pipe {
            Some(mut pipe) => match pipe.write_all(&stdin) {
                // The plugin is free to exit without reading its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                res => res,
            },
            None => Ok(()),
        });
        let stdout_pipe = child.stdout.take();
        let reader = pipe_thread(move || {
            let mut buf = vec![];
            if let Some(mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf)?;
            }
            Ok(buf)
        });

        let status = loop {
            if let Err(e) = ctx.check() {
                warn!("terminating plugin: {}", e);
                let _ = child.kill();
                let _ = child.wait();
                return CmdOutput::failed(CmdError::Context(e));
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return CmdOutput::failed(CmdError::Io(e));
                }
            }
        };

        let stdout = match wait_for(&ctx, &reader) {
            Ok(stdout) => stdout,
            Err(e) => {
                warn!("abandoning plugin output: {}", e);
                return CmdOutput::failed(e);
            }
        };
        if let Err(e) = wait_for(&ctx, &writer) {
            return CmdOutput {
                stdout,
                error: Some(e),
            };
        }

        CmdOutput {
            stdout,
            error: exit_error(status),
        }
    }
}

/// Sends one request to the plugin `executable` and returns its successful response.
///
/// The context is checked before anything is run and again once the plugin is done.
/// Its error is returned in preference to any other outcome.
pub(crate) fn invoke(
    make_cmd: &MakeCmd,
    executable: &str,
    ctx: &Context,
    stdin: Vec<u8>,
    init_options: &InitOptions,
    method_args: MethodArgs,
) -> Result<PluginResp, Error> {
    ctx.check()?;

    let method = method_args.method_name();
    let plugin_args = PluginArgs {
        method_args,
        init_options: init_options.clone(),
    };
    let encoded = serde_json::to_string(&plugin_args).map_err(Error::EncodeArgs)?;
    let args = [PROTOCOL_VERSION.to_owned(), encoded];

    debug!("invoking {} for {}", executable, method);
    let output = make_cmd(ctx, stdin, executable, &args).output();

    ctx.check()?;
    if let Some(e) = output.error {
        match e {
            // Plugins may exit non-zero and still have written a valid response.
            CmdError::Exit(code) if code > 0 => {
                debug!("{} exited with status {}", executable, code)
            }
            CmdError::Context(e) => return Err(e.into()),
            e => return Err(Error::ExecutingPlugin(e)),
        }
    }

    let resp: PluginResp =
        serde_json::from_slice(&output.stdout).map_err(Error::ResponseParse)?;
    match resp.reported_error() {
        Some(message) => Err(Error::PluginReturned(message.to_owned())),
        None => Ok(resp),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use kmsplugin_core::{
        format::{DefaultAlgorithmArgs, DefaultAlgorithmResp, MethodArgs},
        Context, ContextError, HashFunc, InitOptions, PluginArgs, PluginResp, PROTOCOL_VERSION,
    };
    use kmsplugin_handler::parse_args;
    use std::io;
    use std::sync::Mutex;

    use super::{invoke, process_cmd, Cmd, CmdOutput, MakeCmd};
    use crate::error::{CmdError, Error};

    pub(crate) const TEST_EXECUTABLE: &str = "sigstore-kms-test";
    const TEST_STDIN: &[u8] = b"my-stdin";

    /// A [`Cmd`] that runs a closure instead of a process.
    pub(crate) struct FakeCmd(pub(crate) Box<dyn FnOnce() -> CmdOutput>);

    impl Cmd for FakeCmd {
        fn output(self: Box<Self>) -> CmdOutput {
            let FakeCmd(f) = *self;
            f()
        }
    }

    fn init_options() -> InitOptions {
        InitOptions::new("testkms://testkey", HashFunc::Sha512)
    }

    fn method_args() -> MethodArgs {
        MethodArgs::DefaultAlgorithm(DefaultAlgorithmArgs {})
    }

    fn good_resp() -> PluginResp {
        PluginResp {
            default_algorithm: Some(DefaultAlgorithmResp {
                default_algorithm: "alg1".to_owned(),
            }),
            ..Default::default()
        }
    }

    /// Invokes a fake plugin that checks its arguments and then produces `stdout` and
    /// `error`.
    fn invoke_fake(stdout: Vec<u8>, error: Option<CmdError>) -> Result<PluginResp, Error> {
        let result = Mutex::new(Some((stdout, error)));
        let make_cmd: MakeCmd = Box::new(
            move |ctx: &Context, stdin: Vec<u8>, name: &str, args: &[String]| -> Box<dyn Cmd> {
                assert!(ctx.check().is_ok());
                assert_eq!(name, TEST_EXECUTABLE);
                assert_eq!(args[0], PROTOCOL_VERSION);
                assert_eq!(stdin, TEST_STDIN);

                let mut argv = vec![name.to_owned()];
                argv.extend_from_slice(args);
                assert_eq!(
                    parse_args(&argv).unwrap(),
                    PluginArgs {
                        method_args: method_args(),
                        init_options: init_options(),
                    }
                );

                let (stdout, error) = result.lock().unwrap().take().unwrap();
                Box::new(FakeCmd(Box::new(move || CmdOutput { stdout, error })))
            },
        );
        invoke(
            &make_cmd,
            TEST_EXECUTABLE,
            &Context::background(),
            TEST_STDIN.to_vec(),
            &init_options(),
            method_args(),
        )
    }

    fn good_output() -> Vec<u8> {
        serde_json::to_vec(&good_resp()).unwrap()
    }

    fn invoke_with(make_cmd: &MakeCmd, ctx: &Context) -> Result<PluginResp, Error> {
        invoke(
            make_cmd,
            TEST_EXECUTABLE,
            ctx,
            vec![],
            &init_options(),
            method_args(),
        )
    }

    #[test]
    fn success() {
        assert_eq!(invoke_fake(good_output(), None).unwrap(), good_resp());
    }

    #[test]
    fn continues_if_plugin_exits_non_zero() {
        assert_eq!(
            invoke_fake(good_output(), Some(CmdError::Exit(1))).unwrap(),
            good_resp()
        );
    }

    #[test]
    fn error_with_zero_exit_is_execution_failure() {
        assert!(matches!(
            invoke_fake(good_output(), Some(CmdError::Exit(0))),
            Err(Error::ExecutingPlugin(CmdError::Exit(0)))
        ));
    }

    #[test]
    fn signal_is_execution_failure() {
        assert!(matches!(
            invoke_fake(good_output(), Some(CmdError::Exit(-1))),
            Err(Error::ExecutingPlugin(CmdError::Exit(-1)))
        ));
    }

    #[test]
    fn other_errors_are_execution_failures() {
        let e = io::Error::new(io::ErrorKind::NotFound, "exec-error");
        assert!(matches!(
            invoke_fake(good_output(), Some(CmdError::Io(e))),
            Err(Error::ExecutingPlugin(CmdError::Io(_)))
        ));
    }

    #[test]
    fn plugin_reported_error() {
        let output = serde_json::to_vec(&PluginResp::error("404: not found")).unwrap();
        let err = invoke_fake(output, None).unwrap_err();
        assert!(matches!(err, Error::PluginReturned(_)));
        assert!(err.to_string().contains("404: not found"));
    }

    #[test]
    fn reported_error_wins_over_result() {
        let mut resp = good_resp();
        resp.error_message = "404: not found".to_owned();
        let output = serde_json::to_vec(&resp).unwrap();
        assert!(matches!(
            invoke_fake(output, None),
            Err(Error::PluginReturned(_))
        ));
    }

    #[test]
    fn empty_output_is_parse_failure() {
        assert!(matches!(
            invoke_fake(vec![], None),
            Err(Error::ResponseParse(_))
        ));
    }

    #[test]
    fn invalid_output_is_parse_failure() {
        assert!(matches!(
            invoke_fake(b"abc".to_vec(), None),
            Err(Error::ResponseParse(_))
        ));
    }

    #[test]
    fn done_context_skips_process() {
        let make_cmd: MakeCmd = Box::new(
            |_: &Context, _: Vec<u8>, _: &str, _: &[String]| -> Box<dyn Cmd> {
                panic!("no process should be constructed")
            },
        );

        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let res = invoke_with(&make_cmd, &ctx);
        assert!(matches!(res, Err(Error::Context(ContextError::Canceled))));

        let (ctx, _) = Context::background().with_timeout(chrono::Duration::seconds(-1));
        let res = invoke_with(&make_cmd, &ctx);
        assert!(matches!(
            res,
            Err(Error::Context(ContextError::DeadlineExceeded))
        ));
    }

    #[test]
    fn context_error_wins_over_exit_status() {
        let (ctx, cancel) = Context::background().with_cancel();
        let make_cmd: MakeCmd = Box::new(
            move |_: &Context, _: Vec<u8>, _: &str, _: &[String]| -> Box<dyn Cmd> {
                let cancel = cancel.clone();
                Box::new(FakeCmd(Box::new(move || {
                    // Cancelled mid-run; the process was killed.
                    cancel.cancel();
                    CmdOutput {
                        stdout: vec![],
                        error: Some(CmdError::Exit(-1)),
                    }
                })))
            },
        );
        let res = invoke_with(&make_cmd, &ctx);
        assert!(matches!(res, Err(Error::Context(ContextError::Canceled))));
    }

    #[test]
    fn context_done_after_success_is_reported() {
        let (ctx, cancel) = Context::background().with_cancel();
        let make_cmd: MakeCmd = Box::new(
            move |_: &Context, _: Vec<u8>, _: &str, _: &[String]| -> Box<dyn Cmd> {
                let cancel = cancel.clone();
                Box::new(FakeCmd(Box::new(move || {
                    cancel.cancel();
                    CmdOutput {
                        stdout: good_output(),
                        error: None,
                    }
                })))
            },
        );
        let res = invoke_with(&make_cmd, &ctx);
        assert!(matches!(res, Err(Error::Context(ContextError::Canceled))));
    }

    #[cfg(unix)]
    mod process {
        use kmsplugin_core::{Context, ContextError};
        use std::time::Instant;

        use super::super::process_cmd;
        use crate::error::CmdError;

        fn sh(ctx: &Context, stdin: &[u8], script: &str) -> super::CmdOutput {
            process_cmd(ctx, stdin.to_vec(), "sh", &["-c".to_owned(), script.to_owned()])
                .output()
        }

        #[test]
        fn pipes_stdin_to_stdout() {
            let output = sh(&Context::background(), b"my-message", "cat");
            assert!(output.error.is_none());
            assert_eq!(output.stdout, b"my-message");
        }

        #[test]
        fn reports_exit_code_with_output() {
            let output = sh(&Context::background(), b"", "printf ok; exit 3");
            assert!(matches!(output.error, Some(CmdError::Exit(3))));
            assert_eq!(output.stdout, b"ok");
        }

        #[test]
        fn reports_signal_as_negative_status() {
            let output = sh(&Context::background(), b"", "kill -9 $$");
            assert!(matches!(output.error, Some(CmdError::Exit(-1))));
        }

        #[test]
        fn ignores_unread_stdin() {
            let input = vec![0u8; 1 << 20];
            let output = sh(&Context::background(), &input, "exit 0");
            assert!(output.error.is_none());
        }

        #[test]
        fn missing_program() {
            let output = process_cmd(
                &Context::background(),
                vec![],
                "kmsplugin-test-no-such-program",
                &[],
            )
            .output();
            assert!(matches!(output.error, Some(CmdError::Io(_))));
        }

        #[test]
        fn deadline_kills_process() {
            let (ctx, _) = Context::background().with_timeout(chrono::Duration::milliseconds(100));
            let start = Instant::now();
            let output = sh(&ctx, b"", "sleep 10");
            assert!(matches!(
                output.error,
                Some(CmdError::Context(ContextError::DeadlineExceeded))
            ));
            assert!(start.elapsed().as_secs() < 5);
        }

        #[test]
        fn deadline_bounds_wait_for_inherited_stdout() {
            // The backgrounded subshell keeps stdout open after the plugin exits.
            let (ctx, _) = Context::background().with_timeout(chrono::Duration::milliseconds(300));
            let start = Instant::now();
            let output = sh(
                &ctx,
                b"",
                r#"(sleep 4) & printf '{"defaultAlgorithm":{"defaultAlgorithm":"alg1"}}'; exit 0"#,
            );
            assert!(matches!(
                output.error,
                Some(CmdError::Context(ContextError::DeadlineExceeded))
            ));
            assert!(start.elapsed().as_secs() < 3);
        }
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_with_response_succeeds() {
        let make_cmd: MakeCmd = Box::new(|ctx: &Context, stdin: Vec<u8>, _: &str, _: &[String]| {
            let script = r#"printf '{"defaultAlgorithm":{"defaultAlgorithm":"alg1"}}'; exit 1"#;
            process_cmd(ctx, stdin, "sh", &["-c".to_owned(), script.to_owned()])
        });
        let resp = invoke(
            &make_cmd,
            TEST_EXECUTABLE,
            &Context::background(),
            vec![],
            &init_options(),
            method_args(),
        )
        .unwrap();
        assert_eq!(resp, good_resp());
    }

    #[cfg(unix)]
    #[test]
    fn late_response_past_deadline_is_not_success() {
        let make_cmd: MakeCmd = Box::new(|ctx: &Context, stdin: Vec<u8>, _: &str, _: &[String]| {
            let script =
                r#"(sleep 4) & printf '{"defaultAlgorithm":{"defaultAlgorithm":"alg1"}}'; exit 0"#;
            process_cmd(ctx, stdin, "sh", &["-c".to_owned(), script.to_owned()])
        });
        let (ctx, _) = Context::background().with_timeout(chrono::Duration::milliseconds(300));
        assert!(matches!(
            invoke_with(&make_cmd, &ctx),
            Err(Error::Context(ContextError::DeadlineExceeded))
        ));
    }
}
