//! Production step actions: crawl, five LLM analyses, and draft storage.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use sitecast_crawler::{CrawlLimits, Crawler};
use sitecast_shared::{
    ArtifactKind, CrawlConfig, CrawledPage, DomainId, DomainRecord, PostDraft, Result,
    SitecastError,
};
use sitecast_storage::Storage;

use crate::llm::{CompletionOptions, LlmClient};
use crate::pipeline::{RunContext, StepId, StepOutcome, StepRunner};

/// Pages included in the site context.
const CONTEXT_PAGES: usize = 10;

/// Body characters included per page in the site context.
const CONTEXT_BODY_CHARS: usize = 500;

const SITE_ANALYSIS_PROMPT: &str = "You are a brand strategist. Analyze the website and return a JSON brand profile with: brandSummary, targetAudience, uniqueSellingPoints (array), brandPersonality (array of traits), industry, competitors (array of names), strengths (array), weaknesses (array).";

const COMPETITOR_PROMPT: &str = "You are a competitive intelligence analyst. Based on the brand profile and website data, identify top competitors and analyze them. Return JSON with: competitors (array of {name, url, strengths, weaknesses, socialPresence}), marketPosition, opportunities (array).";

const POSITIONING_PROMPT: &str = "You are a brand positioning strategist. Given a brand profile and a competitor analysis, define how the brand should position itself on social media. Return JSON with: uniqueValueProposition, keyDifferentiators (array), areasToEmphasizeInSocial (array), areasToAvoidOrDownplay (array), positioningNarrative (2-3 paragraphs).";

const STRATEGY_PROMPT: &str = "You are a social media content strategist. Create a content strategy based on the brand profile, its positioning, competitors, and target audience. Return JSON with: pillars (array of {name, description, percentage}), postingFrequency (object per platform), contentMix (array of {type, percentage}), toneGuidelines, hashtagStrategy, bestPostingTimes.";

fn calendar_prompt(today: &str) -> String {
    format!(
        "You are a social media campaign planner. Generate a 30-day content calendar starting from today ({today}). \
         Return JSON with: posts (array of {{date (YYYY-MM-DD), platform, contentType, topic, caption, hashtags (array), status: \"draft\"}}). \
         Generate 2-3 posts per day across different platforms. Keep captions engaging and on-brand."
    )
}

/// Step actions backed by the crawler, the LLM, and storage.
pub struct MarketingSteps {
    storage: Arc<Storage>,
    llm: Arc<LlmClient>,
    crawl: CrawlConfig,
}

impl MarketingSteps {
    pub fn new(storage: Arc<Storage>, llm: Arc<LlmClient>, crawl: CrawlConfig) -> Self {
        Self {
            storage,
            llm,
            crawl,
        }
    }

    async fn crawl(&self, ctx: &RunContext) -> Result<StepOutcome> {
        let domain = &ctx.domain;
        let mut count = self.storage.count_crawled_pages(&domain.id).await?;

        if count == 0 {
            info!(
                url = %domain.url,
                max_pages = ctx.options.max_pages,
                "fetching pages"
            );
            let limits = CrawlLimits {
                max_pages: ctx.options.max_pages,
                max_depth: ctx.options.max_depth,
            };
            Crawler::new(&self.crawl)?
                .crawl(&domain.id, &domain.url, &limits, &self.storage)
                .await?;
            count = self.storage.count_crawled_pages(&domain.id).await?;
        }

        if count == 0 {
            return Err(SitecastError::MissingArtifact(format!(
                "crawl of {} produced no pages",
                domain.url
            )));
        }
        Ok(StepOutcome::success(format!(
            "Crawl complete: {count} pages indexed"
        )))
    }

    async fn site_analysis(&self, ctx: &RunContext) -> Result<StepOutcome> {
        let domain = &ctx.domain;
        let pages = self.storage.list_crawled_pages(&domain.id).await?;
        if pages.is_empty() {
            return Err(SitecastError::MissingArtifact(
                "no crawled pages; run the crawl first".into(),
            ));
        }

        let context = build_site_context(domain, &pages);
        let profile = self
            .llm
            .complete(
                SITE_ANALYSIS_PROMPT,
                &format!("Analyze this website:\n{context}\n\nReturn valid JSON only."),
                CompletionOptions::new(0.6, 3000),
            )
            .await?;
        self.storage
            .put_artifact(&domain.id, ArtifactKind::DomainProfile, &profile)
            .await?;

        let industry = profile
            .get("industry")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("identified");
        Ok(StepOutcome::success(format!(
            "Site analysis complete: industry {industry}"
        )))
    }

    async fn competitor_research(&self, ctx: &RunContext) -> Result<StepOutcome> {
        let domain = &ctx.domain;
        let profile = self.require(&domain.id, ArtifactKind::DomainProfile).await?;

        let competitors = self
            .llm
            .complete(
                COMPETITOR_PROMPT,
                &format!(
                    "Brand: {} ({})\nProfile: {profile}\n\nReturn valid JSON only.",
                    domain.name, domain.url
                ),
                CompletionOptions::new(0.6, 3000),
            )
            .await?;
        self.storage
            .put_artifact(&domain.id, ArtifactKind::CompetitorSet, &competitors)
            .await?;

        Ok(StepOutcome::success(format!(
            "Competitor research complete: {} competitors analyzed",
            array_len(&competitors, "competitors")
        )))
    }

    async fn positioning(&self, ctx: &RunContext) -> Result<StepOutcome> {
        let domain = &ctx.domain;
        let profile = self.require(&domain.id, ArtifactKind::DomainProfile).await?;
        let competitors = self.require(&domain.id, ArtifactKind::CompetitorSet).await?;

        let positioning = self
            .llm
            .complete(
                POSITIONING_PROMPT,
                &format!(
                    "Brand: {} ({})\nProfile: {profile}\nCompetitors: {competitors}\n\nReturn valid JSON only.",
                    domain.name, domain.url
                ),
                CompletionOptions::new(0.6, 3000),
            )
            .await?;
        self.storage
            .put_artifact(&domain.id, ArtifactKind::PositioningSummary, &positioning)
            .await?;

        Ok(StepOutcome::success(format!(
            "Positioning complete: {} key differentiators identified",
            array_len(&positioning, "keyDifferentiators")
        )))
    }

    async fn content_strategy(&self, ctx: &RunContext) -> Result<StepOutcome> {
        let domain = &ctx.domain;
        let profile = self.require(&domain.id, ArtifactKind::DomainProfile).await?;
        let competitors = self.require(&domain.id, ArtifactKind::CompetitorSet).await?;
        let positioning = self
            .require(&domain.id, ArtifactKind::PositioningSummary)
            .await?;

        let strategy = self
            .llm
            .complete(
                STRATEGY_PROMPT,
                &format!(
                    "Brand: {}\nGoal: {}\nProfile: {profile}\nPositioning: {positioning}\nCompetitors: {competitors}\n\nReturn valid JSON only.",
                    domain.name,
                    domain.primary_goal.as_deref().unwrap_or("not specified")
                ),
                CompletionOptions::new(0.7, 4000),
            )
            .await?;
        self.storage
            .put_artifact(&domain.id, ArtifactKind::ContentStrategy, &strategy)
            .await?;

        Ok(StepOutcome::success(format!(
            "Content strategy complete: {} content pillars defined",
            array_len(&strategy, "pillars")
        )))
    }

    async fn campaign_calendar(&self, ctx: &RunContext) -> Result<StepOutcome> {
        let domain = &ctx.domain;
        let strategy = self.require(&domain.id, ArtifactKind::ContentStrategy).await?;
        let profile = self.require(&domain.id, ArtifactKind::DomainProfile).await?;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let calendar = self
            .llm
            .complete(
                &calendar_prompt(&today),
                &format!(
                    "Brand: {} ({})\nStrategy: {strategy}\nProfile: {profile}\n\nReturn valid JSON only.",
                    domain.name, domain.url
                ),
                CompletionOptions::new(0.8, 8000),
            )
            .await?;
        self.storage
            .put_artifact(&domain.id, ArtifactKind::CampaignCalendar, &calendar)
            .await?;

        Ok(StepOutcome::success("Campaign calendar generated"))
    }

    async fn post_drafts(&self, ctx: &RunContext) -> Result<StepOutcome> {
        let domain_id = &ctx.domain.id;
        let calendar = self.require(domain_id, ArtifactKind::CampaignCalendar).await?;

        let drafts = calendar_to_drafts(domain_id, &calendar);
        if drafts.is_empty() {
            return Ok(StepOutcome::info(
                "Calendar generated but no individual posts to store as drafts",
            ));
        }

        // Draft storage failures do not fail the run; the calendar artifact
        // is already persisted.
        match self.storage.insert_post_drafts(domain_id, &drafts).await {
            Ok(()) => Ok(StepOutcome::success(format!(
                "Calendar complete: {} posts generated",
                drafts.len()
            ))),
            Err(e) => {
                warn!(error = %e, "failed to store post drafts");
                Ok(StepOutcome::degraded(format!("Failed to store drafts: {e}")))
            }
        }
    }

    async fn require(&self, domain_id: &DomainId, kind: ArtifactKind) -> Result<Value> {
        self.storage
            .get_artifact(domain_id, kind)
            .await?
            .ok_or_else(|| SitecastError::MissingArtifact(format!("{kind} has not been generated")))
    }
}

impl StepRunner for MarketingSteps {
    async fn execute(&self, step: StepId, ctx: &RunContext) -> Result<StepOutcome> {
        match step {
            StepId::Crawl => self.crawl(ctx).await,
            StepId::SiteAnalysis => self.site_analysis(ctx).await,
            StepId::CompetitorResearch => self.competitor_research(ctx).await,
            StepId::Positioning => self.positioning(ctx).await,
            StepId::ContentStrategy => self.content_strategy(ctx).await,
            StepId::CampaignCalendar => self.campaign_calendar(ctx).await,
            StepId::PostDrafts => self.post_drafts(ctx).await,
        }
    }
}

/// Text block describing the domain and its first pages for the analysis prompt.
pub fn build_site_context(domain: &DomainRecord, pages: &[CrawledPage]) -> String {
    let mut ctx = format!(
        "Website: {}\nName: {}\nGoal: {}\nBrand Voice: {}\n\n",
        domain.url,
        domain.name,
        domain.primary_goal.as_deref().unwrap_or("not specified"),
        domain.brand_voice_tone.as_deref().unwrap_or("professional"),
    );
    ctx.push_str(&format!("Crawled Pages ({}):\n", pages.len()));

    for page in pages.iter().take(CONTEXT_PAGES) {
        let heading = if page.title.is_empty() {
            &page.url
        } else {
            &page.title
        };
        let body: String = page.body_text.chars().take(CONTEXT_BODY_CHARS).collect();
        ctx.push_str(&format!("\n--- {heading} ---\n{body}\n"));
    }
    ctx
}

/// Length and hashtag caps for one social platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLimits {
    pub max_chars: usize,
    pub max_hashtags: usize,
}

const PLATFORM_LIMITS: [(&str, PlatformLimits); 6] = [
    ("twitter", PlatformLimits { max_chars: 280, max_hashtags: 5 }),
    ("facebook", PlatformLimits { max_chars: 2000, max_hashtags: 3 }),
    ("instagram", PlatformLimits { max_chars: 2200, max_hashtags: 30 }),
    ("linkedin", PlatformLimits { max_chars: 3000, max_hashtags: 5 }),
    ("pinterest", PlatformLimits { max_chars: 500, max_hashtags: 5 }),
    ("tiktok", PlatformLimits { max_chars: 2200, max_hashtags: 5 }),
];

/// Limits for `platform` (case-insensitive); unknown platforms get Twitter's.
pub fn platform_limits(platform: &str) -> PlatformLimits {
    PLATFORM_LIMITS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(platform))
        .map_or(PLATFORM_LIMITS[0].1, |(_, limits)| *limits)
}

/// Map calendar entries to draft posts.
///
/// Entries come from `posts`, then `drafts`, then `content`. Missing fields
/// fall back: text from `caption|body|content|topic`, date from
/// `date|scheduled_date`, type from `contentType|content_type` (default
/// `post`), platform defaults to `twitter`. Text and hashtags are cut to the
/// platform's [`PlatformLimits`].
pub fn calendar_to_drafts(domain_id: &DomainId, calendar: &Value) -> Vec<PostDraft> {
    let entries = ["posts", "drafts", "content"]
        .iter()
        .find_map(|key| calendar.get(*key).filter(|v| is_truthy(v)))
        .and_then(Value::as_array);

    let Some(entries) = entries else {
        return Vec::new();
    };

    let now = Utc::now();
    entries
        .iter()
        .map(|entry| {
            let platform = first_str(entry, &["platform"]).unwrap_or_else(|| "twitter".into());
            let limits = platform_limits(&platform);
            let text = first_str(entry, &["caption", "body", "content", "topic"])
                .map(|text| text.chars().take(limits.max_chars).collect())
                .unwrap_or_default();
            let hashtags = entry
                .get("hashtags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .take(limits.max_hashtags)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            PostDraft {
                id: Uuid::now_v7().to_string(),
                domain_id: *domain_id,
                platform,
                text,
                scheduled_date: first_str(entry, &["date", "scheduled_date"]),
                status: "draft".into(),
                hashtags,
                content_type: Some(
                    first_str(entry, &["contentType", "content_type"])
                        .unwrap_or_else(|| "post".into()),
                ),
                created_at: now,
            }
        })
        .collect()
}

fn first_str(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| entry.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn array_len(value: &Value, key: &str) -> usize {
    value.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}
