use crate::error::ApiError;
use std::sync::Arc;
use warden_authz::{Classification, ScopeAuthorizer};
use warden_broker::{InboundCredential, TokenBroker};
use warden_core::config::{CapabilityConfig, ServerConfig};
use warden_core::{DeploymentMode, PrincipalId, TokenFormat, VerifiedClaims, WardenConfig};
use warden_verify::{AudienceRequirement, TokenVerifier};

/// Issuer recorded on claims Warden synthesizes for non-OAuth callers.
pub const LOCAL_ISSUER: &str = "warden";

/// Shared application state.
///
/// Built once at startup from the resolved [`DeploymentMode`] and handed to
/// every handler. Call [`AppState::shutdown`] before exit.
pub struct AppState {
    pub mode: DeploymentMode,
    pub server: ServerConfig,
    pub verifier: Option<TokenVerifier>,
    pub audience: Option<AudienceRequirement>,
    pub authorizer: ScopeAuthorizer,
    pub broker: TokenBroker,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub claims: VerifiedClaims,
    pub credential: Option<InboundCredential>,
}

impl AppState {
    pub async fn init(config: &WardenConfig) -> anyhow::Result<Arc<Self>> {
        let mode = config.resolve()?;

        let verifier = match mode.oauth() {
            Some(oauth) => Some(TokenVerifier::from_settings(oauth, &config.verifier)?),
            None => None,
        };

        let authorizer = ScopeAuthorizer::new();
        register_capabilities(&authorizer, &config.capabilities)?;

        let broker = TokenBroker::from_mode(&mode, &config.broker).await?;

        Ok(Arc::new(Self::from_parts(
            mode,
            config.server.clone(),
            verifier,
            authorizer,
            broker,
        )))
    }

    pub fn from_parts(
        mode: DeploymentMode,
        server: ServerConfig,
        verifier: Option<TokenVerifier>,
        authorizer: ScopeAuthorizer,
        broker: TokenBroker,
    ) -> Self {
        if let Some(verifier) = &verifier {
            verifier.extend_vocabulary(&authorizer.supported_scopes());
        }
        let audience = AudienceRequirement::for_mode(&mode);

        tracing::info!(
            mode = %mode.kind(),
            capabilities = authorizer.len(),
            background = broker.supports_background(),
            "Application state ready"
        );

        Self {
            mode,
            server,
            verifier,
            audience,
            authorizer,
            broker,
        }
    }

    pub fn resource_metadata_url(&self) -> String {
        format!("{}/.well-known/oauth-protected-resource", self.server.base_url())
    }

    /// Identify the caller according to the deployment mode.
    pub async fn authenticate(
        &self,
        credential: Option<InboundCredential>,
    ) -> Result<Caller, ApiError> {
        match &self.mode {
            DeploymentMode::SingleUserStatic(settings) => Ok(Caller {
                claims: self.local_claims(&settings.username),
                credential,
            }),
            DeploymentMode::MultiUserPassthrough(_) => {
                let Some(InboundCredential::Basic { username, .. }) = &credential else {
                    return Err(ApiError::MissingBasic);
                };
                let claims = self.local_claims(username);
                Ok(Caller { claims, credential })
            }
            _ => {
                let Some(InboundCredential::Bearer(token)) = &credential else {
                    return Err(ApiError::MissingBearer);
                };
                let (Some(verifier), Some(audience)) = (&self.verifier, &self.audience) else {
                    return Err(ApiError::MissingBearer);
                };
                let claims = verifier.verify(token.expose(), audience).await?;
                Ok(Caller { claims, credential })
            }
        }
    }

    /// Claims for callers that are not verified by bearer token. The
    /// resource service enforces its own access control for them.
    fn local_claims(&self, subject: &str) -> VerifiedClaims {
        VerifiedClaims {
            subject: PrincipalId::new(subject),
            issuer: LOCAL_ISSUER.to_string(),
            audience: Vec::new(),
            scopes: self.authorizer.supported_scopes(),
            expires_at: None,
            authorized_party: None,
            format: TokenFormat::Opaque,
        }
    }

    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.broker.shutdown().await;
    }
}

fn register_capabilities(
    authorizer: &ScopeAuthorizer,
    capabilities: &[CapabilityConfig],
) -> anyhow::Result<()> {
    for capability in capabilities {
        let classification = if capability.write {
            Classification::Write
        } else {
            Classification::Read
        };
        authorizer.register(&capability.id, capability.scopes.clone(), classification)?;
    }
    Ok(())
}
