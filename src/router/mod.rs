pub mod config;
pub mod executor;
pub mod method;
pub mod path;
pub mod route;
pub mod table;

use crate::config::{ConfigProvider, ConfigProviderError};
use crate::exchange::RequestContext;
use crate::handler::registry::{HandlerRegistry, HandlerRegistryError};
use crate::handler::{
    ErrorHandler, Handler, HandlerId, HandlerResult, SharedErrorHandler, SharedHandler,
};
use crate::router::config::{RouterConfig, TableConfig};
use crate::router::executor::Composer;
use crate::router::method::Method;
use crate::router::path::{ensure_absolute, join_paths};
use crate::router::route::{ChainEntry, RouteMeta, Scope};
use crate::router::table::{MatchResult, Params, RouteError, RouteTable};
use fnv::FnvBuildHasher;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Route could not be registered.")]
    Route {
        #[from]
        source: RouteError,
    },

    #[error("Handler could not be resolved.")]
    Registry {
        #[from]
        source: HandlerRegistryError,
    },

    #[error("Route '{pattern}' refers to unknown chain '@{chain}'.")]
    UnknownChain { pattern: String, chain: String },

    #[error("Router configuration could not be loaded.")]
    Config {
        #[from]
        source: ConfigProviderError,
    },
}

impl RouterError {
    #[inline]
    pub(crate) fn unknown_chain(pattern: impl Into<String>, chain: impl Into<String>) -> Self {
        Self::UnknownChain {
            pattern: pattern.into(),
            chain: chain.into(),
        }
    }
}

macro_rules! verb_helpers {
    ($($name:ident => $variant:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers `handler` for `", stringify!($variant), "` requests matching `pattern`.")]
            pub fn $name(
                &mut self,
                pattern: &str,
                handler: impl Handler<C> + 'static,
            ) -> Result<&mut Self, RouterError> {
                self.on(Method::$variant, pattern, handler)
            }
        )*
    };
}

/// Owns the route table of an application and dispatches requests through it.
///
/// # Behavior
/// Registration happens through `&mut self` and ends with [`build`](Router::build)
/// (or the first lookup). Every dispatch runs the router-wide middleware first,
/// then the matched chain, then the not-found handler if the chain falls
/// through. Requests that match nothing still run the middleware before
/// reaching the not-found handler.
///
/// # Example
/// ```rust,ignore
/// let mut router = Router::new();
/// router.middleware(RequestLogger);
/// router.get("/users/:id", ShowUser)?;
/// router.not_found(NotFound);
/// router.build();
///
/// let mut exchange: Exchange<Bytes, Bytes> = Exchange::new("GET", "/users/42");
/// router.dispatch(&mut exchange).await?;
/// ```
pub struct Router<C>
where
    C: RequestContext,
{
    base_path: String,
    table: RouteTable<ChainEntry<C>>,
    routes: Vec<ChainEntry<C>>,
    middleware: Vec<ChainEntry<C>>,
    not_found: Option<SharedHandler<C>>,
    on_error: Option<SharedErrorHandler<C>>,
}

impl<C> Default for Router<C>
where
    C: RequestContext,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Router<C>
where
    C: RequestContext,
{
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self {
            base_path: "/".to_string(),
            table: RouteTable::with_config(config),
            routes: Vec::new(),
            middleware: Vec::new(),
            not_found: None,
            on_error: None,
        }
    }

    /// Prefixes every pattern registered afterwards with `base_path`.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = join_paths("/", &base_path.into());
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Registers `handler` for `method` requests matching `pattern`.
    ///
    /// Handlers registered for the same method and pattern form one chain, in
    /// registration order.
    pub fn on(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler<C> + 'static,
    ) -> Result<&mut Self, RouterError> {
        self.register(method, pattern, Arc::new(handler))?;
        Ok(self)
    }

    verb_helpers! {
        get => Get,
        head => Head,
        post => Post,
        put => Put,
        delete => Delete,
        connect => Connect,
        options => Options,
        trace => Trace,
        patch => Patch,
    }

    /// Registers one shared `handler` for every method.
    pub fn all(
        &mut self,
        pattern: &str,
        handler: impl Handler<C> + 'static,
    ) -> Result<&mut Self, RouterError> {
        let handler: SharedHandler<C> = Arc::new(handler);
        for method in Method::ALL {
            self.register(method, pattern, Arc::clone(&handler))?;
        }
        Ok(self)
    }

    /// Adds router-wide middleware, run in registration order ahead of every chain.
    pub fn middleware(&mut self, handler: impl Handler<C> + 'static) -> &mut Self {
        let meta = RouteMeta::new(None, self.base_path.clone(), self.base_path.clone());
        self.middleware
            .push(ChainEntry::new(Arc::new(handler), Arc::new(meta)));
        self
    }

    /// Sets the handler that runs when no route matches, or when a matched
    /// chain calls `next` past its last handler.
    ///
    /// # Behavior
    /// The handler receives a `next` that does nothing. Routes copied in by
    /// [`mount`](Router::mount) prefer the mounted router's own not-found handler.
    pub fn not_found(&mut self, handler: impl Handler<C> + 'static) -> &mut Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    /// Sets the handler that receives errors and panics raised by handlers.
    ///
    /// # Behavior
    /// Without one, a failing frame's error is returned from
    /// [`dispatch`](Router::dispatch). Routes copied in by [`mount`](Router::mount)
    /// prefer the mounted router's own error handler.
    pub fn on_error(&mut self, handler: impl ErrorHandler<C> + 'static) -> &mut Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Copies the routes of `sub` under `prefix`.
    ///
    /// # Behavior
    /// Each distinct method and pattern of `sub` gets `sub`'s middleware ahead
    /// of its handlers. `sub`'s error and not-found handlers travel with its
    /// routes and take precedence over this router's own for them. Routes
    /// `sub` itself mounted keep their innermost handlers.
    ///
    /// # Errors
    /// The first registration error. Routes copied before it stay registered.
    pub fn mount(&mut self, prefix: &str, sub: Router<C>) -> Result<&mut Self, RouterError> {
        ensure_absolute(prefix).map_err(RouteError::from)?;
        let prefix = join_paths(&self.base_path, prefix);
        let scope = Scope {
            on_error: sub.on_error.clone(),
            not_found: sub.not_found.clone(),
        };
        let scope = (!scope.is_empty()).then(|| Arc::new(scope));
        log::debug!(
            "Mounting {} route entries under '{}'",
            sub.routes.len(),
            prefix
        );

        let mut seen: HashSet<(Method, String), FnvBuildHasher> = HashSet::default();
        for entry in &sub.routes {
            let Some(method) = entry.meta.method else {
                continue;
            };
            let meta = Arc::new(RouteMeta::new(
                Some(method),
                join_paths(&prefix, &entry.meta.pattern),
                join_paths(&prefix, &entry.meta.base_path),
            ));
            if seen.insert((method, meta.pattern.clone())) {
                for middleware in &sub.middleware {
                    let wrapped = ChainEntry::new(Arc::clone(&middleware.handler), Arc::clone(&meta))
                        .with_scope(scope.clone());
                    self.insert(method, wrapped)?;
                }
            }
            let copied = ChainEntry::new(Arc::clone(&entry.handler), meta)
                .with_scope(entry.scope.clone().or_else(|| scope.clone()));
            self.insert(method, copied)?;
        }
        Ok(self)
    }

    /// Every registered chain entry, mounted ones included, in registration order.
    pub fn routes(&self) -> &[ChainEntry<C>] {
        &self.routes
    }

    /// Freezes the route table. Idempotent; called implicitly by the first lookup.
    pub fn build(&self) {
        self.table.build();
    }

    /// Finds the chain for `method` and `path`. `HEAD` requests fall back to
    /// the `GET` routes when no `HEAD` route matches.
    pub fn find(&self, method: Method, path: &str) -> Option<MatchResult<'_, ChainEntry<C>>> {
        self.table.find(method, path).or_else(|| match method {
            Method::Head => self.table.find(Method::Get, path),
            _ => None,
        })
    }

    /// Routes `ctx` and runs the resulting chain.
    ///
    /// # Returns
    /// `Ok(())` once the chain finished or was recovered by an error handler,
    /// otherwise the error no handler took.
    pub async fn dispatch(&self, ctx: &mut C) -> HandlerResult {
        let found = match ctx.method().parse::<Method>() {
            Ok(method) => self.find(method, ctx.path()),
            Err(err) => {
                log::debug!("{}", err);
                None
            }
        };
        let (chain, params) = match found {
            Some(found) => {
                log::trace!("Matched {} '{}'", ctx.method(), ctx.path());
                found.into_parts()
            }
            None => {
                log::debug!("No route for {} '{}'", ctx.method(), ctx.path());
                (&[][..], Params::new())
            }
        };
        ctx.set_params(params);
        Composer::new(
            &self.middleware,
            chain,
            self.not_found.as_deref(),
            self.on_error.as_deref(),
        )
        .dispatch(ctx, 0)
        .await
    }

    /// Builds a router from a declarative configuration.
    ///
    /// Routes are registered in pattern order. `@name` executables expand to
    /// the handlers of chain `name`.
    pub fn from_config(
        config: &RouterConfig,
        registry: &HandlerRegistry<C>,
    ) -> Result<Self, RouterError> {
        let mut router = Self::with_config(config.table.clone());
        for (pattern, methods) in &config.routes {
            for (method, executables) in methods {
                let handlers = config
                    .resolve(executables)
                    .map_err(|chain| RouterError::unknown_chain(pattern, chain))?;
                for name in handlers {
                    let handler = registry.find_with_id(&HandlerId::new(name))?;
                    router.register(*method, pattern, handler)?;
                }
            }
        }
        log::info!(
            "Loaded {} route entries from configuration",
            router.routes.len()
        );
        Ok(router)
    }

    pub fn from_provider(
        provider: &impl ConfigProvider<RouterConfig>,
        registry: &HandlerRegistry<C>,
    ) -> Result<Self, RouterError> {
        let config = provider.load()?;
        Self::from_config(&config, registry)
    }

    fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: SharedHandler<C>,
    ) -> Result<(), RouterError> {
        ensure_absolute(pattern).map_err(RouteError::from)?;
        let meta = RouteMeta::new(
            Some(method),
            join_paths(&self.base_path, pattern),
            self.base_path.clone(),
        );
        self.insert(method, ChainEntry::new(handler, Arc::new(meta)))
    }

    fn insert(&mut self, method: Method, entry: ChainEntry<C>) -> Result<(), RouterError> {
        self.table.add(method, &entry.meta.pattern, entry.clone())?;
        self.routes.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgrammaticConfigProvider;
    use crate::exchange::Exchange;
    use crate::handler::DispatchError;
    use crate::router::executor::Next;
    use crate::status::ExchangeState;
    use async_trait::async_trait;

    type Ctx = Exchange<(), Vec<String>>;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn exchange(method: &str, path: &str) -> Ctx {
        let mut ctx = Ctx::new(method, path);
        ctx.set_output(Vec::new());
        ctx
    }

    fn trace(ctx: &mut Ctx, step: impl Into<String>) {
        if let Some(output) = ctx.output_mut() {
            output.push(step.into());
        }
    }

    fn steps(ctx: &Ctx) -> Vec<String> {
        ctx.output().cloned().unwrap_or_default()
    }

    /// Records its name and passes control on.
    struct Pass(&'static str);

    #[async_trait]
    impl Handler<Ctx> for Pass {
        async fn handle(&self, ctx: &mut Ctx, next: Next<'_, Ctx>) -> HandlerResult {
            trace(ctx, self.0);
            next.run(ctx).await
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    /// Records its name with the bound params and completes the exchange.
    struct Respond(&'static str);

    #[async_trait]
    impl Handler<Ctx> for Respond {
        async fn handle(&self, ctx: &mut Ctx, _next: Next<'_, Ctx>) -> HandlerResult {
            let params: Vec<String> = ctx
                .params()
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            let step = if params.is_empty() {
                self.0.to_string()
            } else {
                format!("{}({})", self.0, params.join(","))
            };
            trace(ctx, step);
            ctx.complete().map_err(DispatchError::handler)
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    struct Fail;

    #[async_trait]
    impl Handler<Ctx> for Fail {
        async fn handle(&self, _ctx: &mut Ctx, _next: Next<'_, Ctx>) -> HandlerResult {
            Err(DispatchError::handler("storage offline"))
        }
    }

    struct NotFound(&'static str);

    #[async_trait]
    impl Handler<Ctx> for NotFound {
        async fn handle(&self, ctx: &mut Ctx, _next: Next<'_, Ctx>) -> HandlerResult {
            trace(ctx, self.0);
            ctx.mark(ExchangeState::NOT_FOUND);
            Ok(())
        }
    }

    struct MarkError(&'static str);

    #[async_trait]
    impl ErrorHandler<Ctx> for MarkError {
        async fn handle_error(&self, error: DispatchError, ctx: &mut Ctx) -> HandlerResult {
            trace(ctx, format!("{}: {}", self.0, error));
            ctx.mark(ExchangeState::ERROR);
            Ok(())
        }
    }

    /// Stores the caller identity for downstream handlers.
    struct Authenticate;

    #[async_trait]
    impl Handler<Ctx> for Authenticate {
        async fn handle(&self, ctx: &mut Ctx, next: Next<'_, Ctx>) -> HandlerResult {
            ctx.attachments_mut().add::<String>("user", "alice".to_string());
            next.run(ctx).await
        }
    }

    struct Whoami;

    #[async_trait]
    impl Handler<Ctx> for Whoami {
        async fn handle(&self, ctx: &mut Ctx, _next: Next<'_, Ctx>) -> HandlerResult {
            let user = ctx
                .attachments()
                .get::<String>("user")
                .cloned()
                .unwrap_or_else(|| "anonymous".to_string());
            trace(ctx, user);
            Ok(())
        }
    }

    fn users_router() -> Router<Ctx> {
        let mut router = Router::new();
        router.get("/users/:id", Respond("show")).unwrap();
        router.get("/users/new", Respond("new")).unwrap();
        router.get("/files/*", Respond("files")).unwrap();
        router.not_found(NotFound("not_found"));
        router
    }

    #[tokio::test]
    async fn end_to_end_matching() {
        init_logger();
        let router = users_router();
        router.build();

        let mut ctx = exchange("GET", "/users/42");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["show(id=42)"]);
        assert_eq!(ctx.params().get("id"), Some("42"));
        assert!(ctx.is_completed());

        let mut ctx = exchange("GET", "/users/new");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["new"]);

        let mut ctx = exchange("GET", "/files/a/b/c");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["files(*=a/b/c)"]);

        let mut ctx = exchange("GET", "/users");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["not_found"]);
        assert!(ctx.state().all_flags(ExchangeState::NOT_FOUND));
        assert!(router.find(Method::Get, "/users").is_none());
    }

    #[tokio::test]
    async fn middleware_wraps_matches_and_misses() {
        let mut router = users_router();
        router.middleware(Pass("log")).middleware(Pass("cors"));

        let mut ctx = exchange("GET", "/users/7");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["log", "cors", "show(id=7)"]);

        let mut ctx = exchange("POST", "/users/7");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["log", "cors", "not_found"]);

        let mut ctx = exchange("BREW", "/users/7");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["log", "cors", "not_found"]);
    }

    #[tokio::test]
    async fn chains_accumulate_per_pattern() {
        let mut router: Router<Ctx> = Router::new();
        router
            .get("/orders", Pass("auth"))
            .unwrap()
            .get("/orders", Pass("audit"))
            .unwrap()
            .get("/orders", Respond("list"))
            .unwrap();

        let mut ctx = exchange("GET", "/orders");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["auth", "audit", "list"]);

        let found = router.find(Method::Get, "/orders").unwrap();
        let names: Vec<&str> = found.chain().iter().map(|e| e.handler.name()).collect();
        assert_eq!(names, vec!["auth", "audit", "list"]);
    }

    #[tokio::test]
    async fn head_falls_back_to_get() {
        let mut router = users_router();
        router.head("/files/*", Respond("head_files")).unwrap();

        let mut ctx = exchange("HEAD", "/users/1");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["show(id=1)"]);

        let mut ctx = exchange("HEAD", "/files/x");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["head_files(*=x)"]);
    }

    #[tokio::test]
    async fn all_registers_every_method() {
        let mut router: Router<Ctx> = Router::new();
        router.all("/ping", Respond("pong")).unwrap();
        for method in Method::ALL {
            assert!(router.find(method, "/ping").is_some(), "{method}");
        }
        assert_eq!(router.routes().len(), Method::ALL.len());
    }

    #[tokio::test]
    async fn errors_reach_the_router_error_handler() {
        let mut router: Router<Ctx> = Router::new();
        router.get("/boom", Fail).unwrap();
        router.on_error(MarkError("router"));

        let mut ctx = exchange("GET", "/boom");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["router: Handler failed."]);
        assert!(ctx.state().is_error());

        let mut bare: Router<Ctx> = Router::new();
        bare.get("/boom", Fail).unwrap();
        let mut ctx = exchange("GET", "/boom");
        assert!(matches!(
            bare.dispatch(&mut ctx).await,
            Err(DispatchError::Handler { .. })
        ));
    }

    #[tokio::test]
    async fn mounted_router_keeps_its_scope() {
        let mut api: Router<Ctx> = Router::new();
        api.middleware(Pass("api_mw"));
        api.get("/users/:id", Respond("show")).unwrap();
        api.get("/users/:id", Respond("unreached")).unwrap();
        api.get("/crash", Fail).unwrap();
        api.get("/", Respond("api_root")).unwrap();
        api.on_error(MarkError("api"));
        api.not_found(NotFound("api_not_found"));

        let mut app: Router<Ctx> = Router::new();
        app.middleware(Pass("app_mw"));
        app.get("/crash", Fail).unwrap();
        app.on_error(MarkError("app"));
        app.not_found(NotFound("app_not_found"));
        app.mount("/api", api).unwrap();

        let mut ctx = exchange("GET", "/api/users/9");
        app.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["app_mw", "api_mw", "show(id=9)"]);

        let mut ctx = exchange("GET", "/api");
        app.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["app_mw", "api_mw", "api_root"]);

        let mut ctx = exchange("GET", "/api/crash");
        app.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["app_mw", "api_mw", "api: Handler failed."]);

        let mut ctx = exchange("GET", "/crash");
        app.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["app_mw", "app: Handler failed."]);

        let mut ctx = exchange("GET", "/api/nothing");
        app.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["app_mw", "app_not_found"]);

        // api's middleware is added once per route, not once per handler
        let found = app.find(Method::Get, "/api/users/1").unwrap();
        assert_eq!(found.chain().len(), 3);
        assert_eq!(found.chain()[0].meta.pattern, "/api/users/:id");
        assert_eq!(found.chain()[0].meta.base_path, "/api");
    }

    #[tokio::test]
    async fn mounted_chain_falls_through_to_scope_not_found() {
        let mut api: Router<Ctx> = Router::new();
        api.get("/health", Pass("health")).unwrap();
        api.not_found(NotFound("api_not_found"));

        let mut app: Router<Ctx> = Router::new();
        app.not_found(NotFound("app_not_found"));
        app.mount("/api", api).unwrap();

        let mut ctx = exchange("GET", "/api/health");
        app.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["health", "api_not_found"]);
    }

    #[tokio::test]
    async fn middleware_data_reaches_handlers() {
        let mut router: Router<Ctx> = Router::new();
        router.middleware(Authenticate);
        router.get("/me", Whoami).unwrap();

        let mut ctx = exchange("GET", "/me");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["alice"]);
    }

    #[test]
    fn base_path_prefixes_patterns() {
        let mut router: Router<Ctx> = Router::new().with_base_path("/v1");
        router.get("/users", Respond("list")).unwrap();
        router.get("/", Respond("root")).unwrap();
        assert!(router.find(Method::Get, "/v1/users").is_some());
        assert!(router.find(Method::Get, "/v1").is_some());
        assert!(router.find(Method::Get, "/users").is_none());
        assert_eq!(router.routes()[0].meta.base_path, "/v1");
    }

    #[test]
    fn registration_errors() {
        let mut router: Router<Ctx> = Router::new();
        router.get("/users/:id", Respond("show")).unwrap();
        assert!(matches!(
            router.get("/users/:name", Respond("by_name")),
            Err(RouterError::Route {
                source: RouteError::AmbiguousRoute { .. }
            })
        ));
        assert!(matches!(
            router.get("users", Respond("bad")),
            Err(RouterError::Route {
                source: RouteError::Pattern { .. }
            })
        ));

        router.build();
        assert!(matches!(
            router.post("/users", Respond("create")),
            Err(RouterError::Route {
                source: RouteError::MatcherFrozen { .. }
            })
        ));
        let found = router.find(Method::Get, "/users/3").unwrap();
        assert_eq!(found.params().get("id"), Some("3"));
        assert_eq!(router.routes().len(), 1);
    }

    #[test]
    fn mount_rejects_relative_prefix() {
        let mut router: Router<Ctx> = Router::new().with_base_path("/v1");
        let result = router.mount("api", users_router());
        assert!(matches!(
            result,
            Err(RouterError::Route {
                source: RouteError::Pattern { .. }
            })
        ));
        assert!(router.routes().is_empty());
        assert!(router.find(Method::Get, "/v1/api/users/1").is_none());

        router.mount("/api", users_router()).unwrap();
        assert!(router.find(Method::Get, "/v1/api/users/1").is_some());
    }

    /// Suspends the task before handing control on.
    struct Yield(&'static str);

    #[async_trait]
    impl Handler<Ctx> for Yield {
        async fn handle(&self, ctx: &mut Ctx, next: Next<'_, Ctx>) -> HandlerResult {
            tokio::task::yield_now().await;
            trace(ctx, self.0);
            let result = next.run(ctx).await;
            tokio::task::yield_now().await;
            result
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_router_dispatches_concurrently() {
        init_logger();
        let mut router: Router<Ctx> = Router::new();
        router.middleware(Yield("outer"));
        router.get("/u/:id", Respond("user")).unwrap();
        router.not_found(NotFound("not_found"));
        router.build();
        let router = Arc::new(router);

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    let mut ctx = exchange("GET", &format!("/u/{i}"));
                    router.dispatch(&mut ctx).await.unwrap();
                    (i, ctx)
                })
            })
            .collect();

        for task in tasks {
            let (i, ctx) = task.await.unwrap();
            let id = i.to_string();
            assert_eq!(ctx.params().get("id"), Some(id.as_str()));
            assert_eq!(steps(&ctx), vec!["outer".to_string(), format!("user(id={i})")]);
            assert!(ctx.is_completed());
        }
    }

    fn registry() -> HandlerRegistry<Ctx> {
        let mut registry = HandlerRegistry::new();
        registry
            .register_handler(HandlerId::new("auth"), Pass("auth"))
            .unwrap();
        registry
            .register_handler(HandlerId::new("audit"), Pass("audit"))
            .unwrap();
        registry
            .register_handler(HandlerId::new("show_user"), Respond("show_user"))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn builds_from_config() {
        let config = RouterConfig::new()
            .chain("secured", &["auth", "audit"])
            .route("/users/:id", Method::Get, &["@secured", "show_user"]);
        let provider = ProgrammaticConfigProvider { config };
        let router = Router::from_provider(&provider, &registry()).unwrap();

        let mut ctx = exchange("GET", "/users/5");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["auth", "audit", "show_user(id=5)"]);
    }

    #[test]
    fn config_errors() {
        let unknown_chain = RouterConfig::new().route("/x", Method::Get, &["@missing"]);
        assert!(matches!(
            Router::from_config(&unknown_chain, &registry()),
            Err(RouterError::UnknownChain { .. })
        ));

        let missing_handler = RouterConfig::new().route("/x", Method::Get, &["ghost"]);
        assert!(matches!(
            Router::from_config(&missing_handler, &registry()),
            Err(RouterError::Registry {
                source: HandlerRegistryError::MissingHandler { .. }
            })
        ));
    }

    #[tokio::test]
    async fn structural_only_router_behaves_the_same() {
        let config = TableConfig {
            fast_path: false,
            ..TableConfig::default()
        };
        let mut router: Router<Ctx> = Router::with_config(config);
        router.get("/users/:id", Respond("show")).unwrap();
        router.get("/users/new", Respond("new")).unwrap();

        let mut ctx = exchange("GET", "/users/new");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["new"]);

        let mut ctx = exchange("GET", "/users/8");
        router.dispatch(&mut ctx).await.unwrap();
        assert_eq!(steps(&ctx), vec!["show(id=8)"]);
    }
}
