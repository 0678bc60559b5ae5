//! Reconstructing a request from the plugin's command-line arguments.

use kmsplugin_core::{PluginArgs, PROTOCOL_VERSION};
use thiserror::Error;

/// Number of arguments including the program name: `PROGRAM VERSION ARGS`.
const ARG_COUNT: usize = 3;

#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("expected {expected} arguments, got {0}", expected = ARG_COUNT)]
    MissingArguments(usize),
    #[error("expected {expected} arguments, got {0}", expected = ARG_COUNT)]
    TrailingArguments(usize),
    #[error("unsupported protocol version {got:?} (expected {expected:?})")]
    ProtocolVersionMismatch { expected: &'static str, got: String },
    #[error("invalid plugin arguments: {0}")]
    Decode(#[from] serde_json::Error),
}

fn check_version(got: &str) -> Result<(), ArgsError> {
    if got == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ArgsError::ProtocolVersionMismatch {
            expected: PROTOCOL_VERSION,
            got: got.to_owned(),
        })
    }
}

/// Parses the process arguments (including the program name) into a request.
///
/// The protocol version in the first argument is checked before anything is decoded.
pub fn parse_args<S: AsRef<str>>(argv: &[S]) -> Result<PluginArgs, ArgsError> {
    if argv.len() < ARG_COUNT {
        return Err(ArgsError::MissingArguments(argv.len()));
    }
    if argv.len() > ARG_COUNT {
        return Err(ArgsError::TrailingArguments(argv.len()));
    }
    check_version(argv[1].as_ref())?;

    let args: PluginArgs = serde_json::from_str(argv[2].as_ref())?;
    check_version(&args.init_options.protocol_version)?;
    Ok(args)
}

#[cfg(test)]
mod tests {
    use kmsplugin_core::{
        format::{DefaultAlgorithmArgs, MethodArgs},
        HashFunc, InitOptions, PluginArgs,
    };

    use super::{parse_args, ArgsError};

    fn encoded_args(init_options: InitOptions) -> String {
        serde_json::to_string(&PluginArgs {
            method_args: MethodArgs::DefaultAlgorithm(DefaultAlgorithmArgs {}),
            init_options,
        })
        .unwrap()
    }

    #[test]
    fn parses_valid_arguments() {
        let init_options = InitOptions::new("testkms://testkey", HashFunc::Sha256);
        let argv = vec![
            "sigstore-kms-test".to_owned(),
            "v1".to_owned(),
            encoded_args(init_options.clone()),
        ];
        let args = parse_args(&argv).unwrap();
        assert_eq!(args.init_options, init_options);
        assert_eq!(
            args.method_args,
            MethodArgs::DefaultAlgorithm(DefaultAlgorithmArgs {})
        );
    }

    #[test]
    fn rejects_wrong_argument_count() {
        assert!(matches!(
            parse_args(&["sigstore-kms-test"]),
            Err(ArgsError::MissingArguments(1))
        ));
        assert!(matches!(
            parse_args(&["sigstore-kms-test", "v1"]),
            Err(ArgsError::MissingArguments(2))
        ));
        assert!(matches!(
            parse_args(&["sigstore-kms-test", "v1", "{}", "extra"]),
            Err(ArgsError::TrailingArguments(4))
        ));
    }

    #[test]
    fn checks_version_before_decoding() {
        match parse_args(&["sigstore-kms-test", "v0", "not json"]) {
            Err(ArgsError::ProtocolVersionMismatch { expected, got }) => {
                assert_eq!(expected, "v1");
                assert_eq!(got, "v0");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn rejects_mismatched_init_version() {
        let mut init_options = InitOptions::new("testkms://testkey", HashFunc::Sha256);
        init_options.protocol_version = "v2".to_owned();
        let encoded = encoded_args(init_options);
        assert!(matches!(
            parse_args(&["sigstore-kms-test", "v1", encoded.as_str()]),
            Err(ArgsError::ProtocolVersionMismatch { .. })
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            parse_args(&["sigstore-kms-test", "v1", "abc"]),
            Err(ArgsError::Decode(_))
        ));
        assert!(matches!(
            parse_args(&["sigstore-kms-test", "v1", r#"{"methodName":"publicKey"}"#]),
            Err(ArgsError::Decode(_))
        ));
    }
}
