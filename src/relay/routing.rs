//! # 路由选择
//!
//! 目的号码按优先级从高到低匹配已编译的规则集，取第一条命中规则的账户。
//! 同优先级时按规则 id 升序，保证结果可复现。
//!
//! 规则集整体编译后缓存，过期时间为 `ttl`；任何一条规则的正则非法都会让整次加载失败，
//! 不会在请求匹配中途才发现。规则或账户变更后可调用 [`RoutingResolver::invalidate`] 立即生效，
//! 否则最迟在一个 `ttl` 后生效。

use regex::Regex;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::dao::provider_account::{get_active_provider_account, ProviderAccount};
use crate::dao::routing_rule::{create_routing_rule, list_active_routing_rules, RoutingRule};
use crate::relay::error::{RelayError, RoutingError};

/// 编译后的单条规则
#[derive(Debug, Clone)]
struct CompiledRule {
    id: i64,
    priority: i64,
    account_sid: String,
    regex: Regex,
}

/// 已按 (priority DESC, id ASC) 排序的规则集
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleSet {
    rules: Vec<CompiledRule>,
}

impl CompiledRuleSet {
    /// 编译全部规则；任意一条非法即整体失败
    pub fn compile(rules: &[RoutingRule]) -> Result<Self, RoutingError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            compiled.push(CompiledRule {
                id: rule.id,
                priority: rule.priority,
                account_sid: rule.account_sid.clone(),
                regex: compile_pattern(rule.id, &rule.pattern)?,
            });
        }

        compiled.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(Self { rules: compiled })
    }

    /// 返回命中规则的 (rule_id, account_sid)
    pub fn select<'a>(&'a self, destination: &'a str) -> Option<(i64, &'a str)> {
        self.matches(destination).next()
    }

    /// 按评估顺序返回所有命中的规则
    pub fn matches<'a>(&'a self, destination: &'a str) -> impl Iterator<Item = (i64, &'a str)> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.regex.is_match(destination))
            .map(|rule| (rule.id, rule.account_sid.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 规则从号码开头锚定匹配
fn compile_pattern(rule_id: i64, pattern: &str) -> Result<Regex, RoutingError> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|e| RoutingError::InvalidPattern {
        rule_id,
        reason: e.to_string(),
    })
}

type CachedRules = Option<(Instant, Arc<CompiledRuleSet>)>;

#[derive(Clone)]
pub struct RoutingResolver {
    pool: SqlitePool,
    ttl: Duration,
    cache: Arc<RwLock<CachedRules>>,
}

impl RoutingResolver {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// 为目的号码选择服务商账户
    ///
    /// `forced_account_sid` 指向的账户处于启用状态时直接使用，跳过规则匹配。
    pub async fn resolve(
        &self,
        destination: &str,
        forced_account_sid: Option<&str>,
    ) -> Result<ProviderAccount, RelayError> {
        if let Some(sid) = forced_account_sid {
            match get_active_provider_account(&self.pool, sid).await? {
                Some(account) => {
                    debug!(account_sid = %sid, "Forced routing applied");
                    return Ok(account);
                }
                None => {
                    warn!(account_sid = %sid, "Forced account inactive or missing, falling back to routing rules");
                }
            }
        }

        let rules = self.rules().await?;
        let mut stale = false;
        for (rule_id, account_sid) in rules.matches(destination) {
            // 规则集缓存期间账户可能已被停用
            match get_active_provider_account(&self.pool, account_sid).await? {
                Some(account) => {
                    debug!(rule_id = rule_id, account_sid = %account_sid, "Routing rule matched");
                    if stale {
                        self.invalidate().await;
                    }
                    return Ok(account);
                }
                None => {
                    warn!(rule_id = rule_id, account_sid = %account_sid, "Matched account no longer active, trying next rule");
                    stale = true;
                }
            }
        }

        if stale {
            self.invalidate().await;
        }
        info!(destination = %destination, "No routing rule matched");
        Err(RoutingError::NoMatch {
            destination: destination.to_string(),
        }
        .into())
    }

    /// 校验正则后新建规则，并使缓存失效
    pub async fn create_rule(
        &self,
        priority: i64,
        pattern: &str,
        account_sid: &str,
        description: &str,
    ) -> Result<i64, RelayError> {
        compile_pattern(0, pattern)?;
        let rule_id = create_routing_rule(&self.pool, priority, pattern, account_sid, description).await?;
        self.invalidate().await;

        info!(rule_id = rule_id, priority = priority, account_sid = %account_sid, "Routing rule created");
        Ok(rule_id)
    }

    /// 丢弃缓存的规则集，下次解析时重新加载
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn rules(&self) -> Result<Arc<CompiledRuleSet>, RelayError> {
        if let Some((loaded_at, rules)) = self.cache.read().await.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(rules.clone());
            }
        }

        let mut guard = self.cache.write().await;
        if let Some((loaded_at, rules)) = guard.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(rules.clone());
            }
        }

        let rows = list_active_routing_rules(&self.pool).await?;
        let compiled = CompiledRuleSet::compile(&rows).map_err(|e| {
            error!(error = %e, "Routing rule set failed to load");
            e
        })?;

        debug!(rules = compiled.len(), "Routing rules loaded");
        let compiled = Arc::new(compiled);
        *guard = Some((Instant::now(), compiled.clone()));
        Ok(compiled)
    }
}
