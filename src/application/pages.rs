//! The page cache: compiled templates plus the currently published render
//! generation.
//!
//! Rendered output is published as an immutable [`PageSet`] behind an atomic
//! pointer swap. Readers load whatever generation is current and can never
//! observe a half-written one; writers serialize publication through a
//! rebuild mutex, so the frame and body of any entry always come from the
//! same generation.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;
use metrics::counter;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::{template::Template, types::PageId};

use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "application::pages";

/// One page's rendered output within a generation.
#[derive(Clone)]
pub struct RenderedPage {
    /// The bare page body (served to partial-content fetches).
    pub body: Arc<str>,
    /// The body embedded in the shared site frame.
    pub framed: Arc<str>,
}

/// An immutable, self-consistent render generation.
pub struct PageSet {
    generation: u64,
    stats: Arc<Value>,
    pages: HashMap<PageId, RenderedPage>,
}

impl PageSet {
    fn empty() -> Self {
        Self {
            generation: 0,
            stats: Arc::new(json!({})),
            pages: HashMap::new(),
        }
    }
}

pub struct PageCache {
    portal: Value,
    pool_configs: Value,
    frame: RwLock<Template>,
    templates: RwLock<HashMap<PageId, Template>>,
    published: ArcSwap<PageSet>,
    rebuild: Mutex<()>,
    generation: AtomicU64,
}

impl PageCache {
    /// Create a cache over the compiled frame and page templates.
    ///
    /// `portal` and `pool_configs` are the static render-context halves,
    /// supplied wholesale at startup. Nothing is rendered until the first
    /// [`rebuild_all`](Self::rebuild_all).
    pub fn new(
        frame: Template,
        templates: HashMap<PageId, Template>,
        portal: Value,
        pool_configs: Value,
    ) -> Self {
        Self {
            portal,
            pool_configs,
            frame: RwLock::new(frame),
            templates: RwLock::new(templates),
            published: ArcSwap::from_pointee(PageSet::empty()),
            rebuild: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Render every page against `stats` and publish the result as one new
    /// generation. Readers see either the previous generation or this one,
    /// never a mixture.
    pub fn rebuild_all(&self, stats: Value) {
        let _guard = mutex_lock(&self.rebuild, SOURCE, "rebuild_all");
        let stats = Arc::new(stats);

        let pages = {
            let frame = rw_read(&self.frame, SOURCE, "rebuild_all.frame");
            let templates = rw_read(&self.templates, SOURCE, "rebuild_all.templates");
            let mut pages = HashMap::with_capacity(templates.len());
            for (id, template) in templates.iter() {
                pages.insert(id.clone(), self.render_entry(&frame, template, id, &stats));
            }
            pages
        };

        let generation = self.next_generation();
        self.published.store(Arc::new(PageSet {
            generation,
            stats,
            pages,
        }));
        counter!("pooldash_page_rebuild_total", "kind" => "full").increment(1);
        debug!(generation, "Published full page rebuild");
    }

    /// Replace one page's render function and re-render only that page
    /// against the last-published statistics snapshot.
    ///
    /// Every other entry is carried into the new generation untouched (the
    /// file-change fast path must not pay for a full statistics pass).
    /// Returns `false` for a page id outside the configured set.
    pub fn rebuild_one(&self, id: &PageId, template: Template) -> bool {
        let _guard = mutex_lock(&self.rebuild, SOURCE, "rebuild_one");

        {
            let mut templates = rw_write(&self.templates, SOURCE, "rebuild_one.install");
            if !templates.contains_key(id) {
                warn!(page = %id, "Ignoring rebuild for unconfigured page");
                return false;
            }
            templates.insert(id.clone(), template);
        }

        let current = self.published.load_full();
        let entry = {
            let frame = rw_read(&self.frame, SOURCE, "rebuild_one.frame");
            let templates = rw_read(&self.templates, SOURCE, "rebuild_one.templates");
            let template = match templates.get(id) {
                Some(template) => template,
                None => return false,
            };
            self.render_entry(&frame, template, id, &current.stats)
        };

        let mut pages = current.pages.clone();
        pages.insert(id.clone(), entry);

        let generation = self.next_generation();
        self.published.store(Arc::new(PageSet {
            generation,
            stats: current.stats.clone(),
            pages,
        }));
        counter!("pooldash_page_rebuild_total", "kind" => "single").increment(1);
        debug!(page = %id, generation, "Published single-page rebuild");
        true
    }

    /// Replace the frame template and re-render everything, since every
    /// framed body embeds it.
    pub fn rebuild_frame(&self, frame: Template) {
        {
            let _guard = mutex_lock(&self.rebuild, SOURCE, "rebuild_frame");
            *rw_write(&self.frame, SOURCE, "rebuild_frame.install") = frame;
        }
        self.rebuild_all(self.latest_stats().as_ref().clone());
    }

    /// Swap in a freshly compiled template set and re-render everything.
    /// Used by the administrative reload action.
    pub fn reload(&self, frame: Template, templates: HashMap<PageId, Template>) {
        {
            let _guard = mutex_lock(&self.rebuild, SOURCE, "reload");
            *rw_write(&self.frame, SOURCE, "reload.frame") = frame;
            *rw_write(&self.templates, SOURCE, "reload.templates") = templates;
        }
        self.rebuild_all(self.latest_stats().as_ref().clone());
    }

    /// Framed page lookup. Pure read; never blocks on a rebuild.
    pub fn get(&self, id: &PageId) -> Option<Arc<str>> {
        self.published.load().pages.get(id).map(|p| p.framed.clone())
    }

    /// Bare page-body lookup for partial-content fetches.
    pub fn get_raw(&self, id: &PageId) -> Option<Arc<str>> {
        self.published.load().pages.get(id).map(|p| p.body.clone())
    }

    /// Render one page with request-scoped context merged into a private
    /// copy of the current statistics snapshot.
    ///
    /// The shared cache is never touched, so concurrent requests cannot
    /// observe each other's transient context values.
    pub fn render_detached(&self, id: &PageId, extra: Value) -> Option<Arc<str>> {
        let current = self.published.load_full();
        let mut stats = current.stats.as_ref().clone();
        merge_object(&mut stats, extra);

        let frame = rw_read(&self.frame, SOURCE, "render_detached.frame");
        let templates = rw_read(&self.templates, SOURCE, "render_detached.templates");
        let template = templates.get(id)?;
        let entry = self.render_entry(&frame, template, id, &stats);
        Some(entry.framed)
    }

    /// The statistics snapshot the current generation was rendered from.
    pub fn latest_stats(&self) -> Arc<Value> {
        self.published.load().stats.clone()
    }

    /// Generation number of the currently published set.
    pub fn generation(&self) -> u64 {
        self.published.load().generation
    }

    /// The configured page ids.
    pub fn page_ids(&self) -> Vec<PageId> {
        rw_read(&self.templates, SOURCE, "page_ids")
            .keys()
            .cloned()
            .collect()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn render_entry(
        &self,
        frame: &Template,
        template: &Template,
        id: &PageId,
        stats: &Value,
    ) -> RenderedPage {
        let body = template.render(&json!({
            "canonical": id.canonical_path(),
            "pool_configs": self.pool_configs,
            "stats": stats,
            "portal": self.portal,
        }));
        let framed = frame.render(&json!({
            "page": body,
            "selected": id.as_str(),
            "stats": stats,
            "pool_configs": self.pool_configs,
            "portal": self.portal,
        }));
        RenderedPage {
            body: Arc::from(body),
            framed: Arc::from(framed),
        }
    }
}

fn merge_object(base: &mut Value, extra: Value) {
    match (base, extra) {
        (Value::Object(base), Value::Object(extra)) => {
            for (key, value) in extra {
                base.insert(key, value);
            }
        }
        (base, extra) => *base = extra,
    }
}
