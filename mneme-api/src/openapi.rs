//! OpenAPI documentation

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Registers the bearer (context-id) security scheme.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Memory-context id (mk_…)"))
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI document for the MNEME API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "MNEME API",
        description = "Memory-augmented inference proxy",
        license(name = "MIT")
    ),
    modifiers(&BearerAuth),
    paths(
        crate::routes::inference::chat_completions,
        crate::routes::inference::messages,
        crate::routes::owners::create_owner,
        crate::routes::contexts::list_contexts,
        crate::routes::contexts::create_context,
        crate::routes::contexts::delete_context,
        crate::routes::contexts::clear_context,
        crate::routes::contexts::context_stats,
        crate::routes::sessions::list_sessions,
        crate::routes::sessions::get_session,
        crate::routes::sessions::delete_session,
        crate::routes::sessions::search_session,
        crate::routes::billing::overview,
        crate::routes::billing::usage,
        crate::routes::billing::quota_status,
        crate::routes::billing::payment_methods,
        crate::routes::billing::invoices,
        crate::routes::credentials::list_credentials,
        crate::routes::credentials::set_credential,
        crate::routes::credentials::delete_credential,
        crate::routes::events::receive_event,
        crate::routes::health::health,
    ),
    components(schemas(
        crate::error::ApiError,
        crate::error::ErrorCode,
        mneme_core::OwnerId,
        mneme_core::ContextId,
        mneme_core::SessionId,
        mneme_core::ChunkId,
        mneme_core::RequestId,
        mneme_core::UsageRecordId,
        mneme_core::Owner,
        mneme_core::MemoryContext,
        mneme_core::Session,
        mneme_core::UsageRecord,
        mneme_core::ProviderCredential,
        mneme_core::BillingState,
        mneme_core::ProviderFamily,
        mneme_core::RecencyBias,
        mneme_core::ChunkRole,
        mneme_core::TemporalWindow,
        crate::routes::owners::OwnerResponse,
        crate::routes::contexts::CreateContextRequest,
        crate::routes::contexts::ContextResponse,
        crate::routes::contexts::ListContextsResponse,
        crate::routes::contexts::ContextStatsResponse,
        crate::routes::sessions::ListSessionsResponse,
        crate::routes::sessions::SearchSessionRequest,
        crate::routes::sessions::SearchMatch,
        crate::routes::sessions::SearchSessionResponse,
        crate::routes::billing::BillingOverview,
        crate::routes::billing::UsageResponse,
        crate::routes::billing::QuotaStatus,
        crate::routes::billing::PaymentMethod,
        crate::routes::billing::PaymentMethodsResponse,
        crate::routes::billing::InvoiceLine,
        crate::routes::billing::InvoicesResponse,
        crate::routes::credentials::SetCredentialRequest,
        crate::routes::credentials::ListCredentialsResponse,
        crate::routes::events::EventAck,
        crate::routes::health::HealthResponse,
    )),
    tags(
        (name = "Inference", description = "Memory-augmented inference surfaces"),
        (name = "Contexts", description = "Memory context lifecycle"),
        (name = "Sessions", description = "Session lifecycle"),
        (name = "Billing", description = "Billing and quota"),
        (name = "Credentials", description = "BYOK provider credentials"),
        (name = "Events", description = "Subscription events intake"),
        (name = "Owners", description = "Owner bootstrap"),
        (name = "Health", description = "Service health"),
    )
)]
pub struct ApiDoc;
