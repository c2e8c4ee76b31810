use std::{fmt, io};

use rustls::{AlertDescription, Error as RustlsError};
use strand_transport::{
    ErrorCategory, TransportError,
    error::{HANDSHAKE, MATERIAL},
};

/// TLS 错误映射模块。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `rustls`/IO 层的失败统一映射到 [`ErrorCategory`]，让客户端能够区分
///   “网络断了”（可重试）与“对端不信任我”（立即失败）；
/// - 安全材料（证书、私钥、密钥库）的问题统一归入 `SecurityMaterial`，与普通 IO 错误分开。
///
/// ## 逻辑（How）
/// - `map_handshake_error` 检查 `io::Error` 是否包裹 `rustls::Error`，有则细分，否则按 IO 分类；
/// - `categorize_rustls_error` 把证书类错误归为 `Authentication`、报文类错误归为 `Integrity`；
/// - `alert_to_category` 针对收到的 TLS Alert 做进一步细化。
///
/// ## 风险与权衡（Trade-offs）
/// - 未穷举的 Alert 与 `General` 类错误按完整性失败处理：不会被重试，宁可尽早暴露问题。
pub(crate) fn map_handshake_error(error: io::Error) -> TransportError {
    match rustls_cause(&error).map(categorize_rustls_error) {
        Some(category) => TransportError::new(HANDSHAKE, category, &error).with_source(error),
        None => TransportError::from_io(HANDSHAKE, error),
    }
}

/// 对建连之后的读写错误做分类；非 TLS 错误返回 `None`。
pub(crate) fn classify_stream_error(error: &io::Error) -> Option<ErrorCategory> {
    rustls_cause(error).map(categorize_rustls_error)
}

/// 构造安全材料错误。
pub(crate) fn material_error(detail: impl fmt::Display) -> TransportError {
    TransportError::new(MATERIAL, ErrorCategory::SecurityMaterial, detail)
}

/// 构造带底层来源的安全材料错误。
pub(crate) fn material_error_from(
    detail: impl fmt::Display,
    source: impl std::error::Error + Send + Sync + 'static,
) -> TransportError {
    let error = material_error(format!("{detail}: {source}"));
    error.with_source(source)
}

fn rustls_cause(error: &io::Error) -> Option<&RustlsError> {
    error.get_ref()?.downcast_ref::<RustlsError>()
}

fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    use RustlsError::*;
    match error {
        NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType => ErrorCategory::Authentication,
        AlertReceived(alert) => alert_to_category(alert),
        FailedToGetCurrentTime | FailedToGetRandomBytes | BadMaxFragmentSize | InconsistentKeys(_) => {
            ErrorCategory::SecurityMaterial
        }
        _ => ErrorCategory::Integrity,
    }
}

fn alert_to_category(alert: &AlertDescription) -> ErrorCategory {
    use AlertDescription::*;
    match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | NoCertificate
        | CertificateUnobtainable
        | CertificateRequired
        | AccessDenied => ErrorCategory::Authentication,
        CloseNotify | UserCanceled => ErrorCategory::Connection,
        _ => ErrorCategory::Integrity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::CertificateError;

    fn wrapped(error: RustlsError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, error)
    }

    #[test]
    fn rejected_certificates_are_authentication_failures() {
        let error = map_handshake_error(wrapped(RustlsError::AlertReceived(
            AlertDescription::UnknownCA,
        )));
        assert_eq!(error.category(), ErrorCategory::Authentication);
        assert_eq!(error.code(), HANDSHAKE.code);
        assert!(!error.is_retryable());

        let error = map_handshake_error(wrapped(RustlsError::InvalidCertificate(
            CertificateError::UnknownIssuer,
        )));
        assert_eq!(error.category(), ErrorCategory::Authentication);
    }

    #[test]
    fn plain_io_failures_keep_their_io_category() {
        let error = map_handshake_error(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(error.category(), ErrorCategory::Connection);
        assert!(error.is_retryable());
        assert_eq!(
            classify_stream_error(&io::Error::from(io::ErrorKind::BrokenPipe)),
            None
        );
    }

    #[test]
    fn protocol_violations_are_integrity_failures() {
        let error = wrapped(RustlsError::DecryptError);
        assert_eq!(classify_stream_error(&error), Some(ErrorCategory::Integrity));
    }
}
