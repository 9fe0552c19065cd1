//! The per-image translation pipeline: detect text boxes, merge them, read
//! each region, translate the batch and draw the result over the page.

use anyhow::{Result, anyhow};
use image::DynamicImage;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

use crate::cache::{self, CacheLayer, CacheRegion};
use crate::ocr::{
    BoundingBox, OverlayRenderer, TesseractDetector, TesseractReader, cap_boxes, crop_regions,
    merge_boxes, paste_background, text_fill,
};
use crate::providers::OpenAiTranslator;
use crate::settings::Settings;

pub type StageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Finds candidate text regions on a whole page.
pub trait BoxDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>>;
}

/// Reads the text inside one cropped region.
pub trait TextReader: Send + Sync {
    fn read(&self, region: &DynamicImage) -> Result<String>;
}

/// Translates an ordered batch, returning one string per input string.
pub trait BatchTranslator: Send + Sync {
    fn translate_batch<'a>(&'a self, texts: &'a [String]) -> StageFuture<'a, Vec<String>>;
}

/// Which stages were answered from the cache. `all` is the conjunction of
/// the three stage flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub all: bool,
    pub boxes: bool,
    pub extract: bool,
    pub translate: bool,
}

impl CacheInfo {
    pub fn new(boxes: bool, extract: bool, translate: bool) -> Self {
        Self {
            all: boxes && extract && translate,
            boxes,
            extract,
            translate,
        }
    }
}

pub struct PipelineOutput {
    pub image: DynamicImage,
    pub boxes: Vec<BoundingBox>,
    pub cache_info: CacheInfo,
}

/// What a worker runs for every job. Workers only look at the output image
/// and `cache_info.all`.
pub trait Pipeline {
    fn run_expanded<'a>(&'a self, image: DynamicImage) -> StageFuture<'a, PipelineOutput>;
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_boxes: usize,
    pub merge_tolerance: i64,
    pub debug: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_boxes: 512,
            merge_tolerance: crate::ocr::DEFAULT_TOLERANCE,
            debug: false,
        }
    }
}

pub struct TranslationPipeline<D, R, T> {
    detector: D,
    reader: R,
    translator: T,
    renderer: OverlayRenderer,
    cache: CacheLayer,
    options: PipelineOptions,
}

impl<D, R, T> TranslationPipeline<D, R, T>
where
    D: BoxDetector,
    R: TextReader,
    T: BatchTranslator,
{
    pub fn new(
        detector: D,
        reader: R,
        translator: T,
        renderer: OverlayRenderer,
        cache: CacheLayer,
        options: PipelineOptions,
    ) -> Self {
        Self {
            detector,
            reader,
            translator,
            renderer,
            cache,
            options,
        }
    }

    async fn run(&self, image: DynamicImage) -> Result<PipelineOutput> {
        let image_hash = cache::image_hash(&image);

        debug!("getting text locations");
        let (detected, boxes_cached) = self
            .cache
            .get_or_compute(CacheRegion::Boxes, &image_hash, || self.detector.detect(&image))?;
        let detected = if detected.len() > self.options.max_boxes {
            warn!(
                "{} text boxes detected, keeping the {} most confident",
                detected.len(),
                self.options.max_boxes
            );
            cap_boxes(detected, self.options.max_boxes)
        } else {
            detected
        };

        debug!("merging {} boxes", detected.len());
        let boxes = merge_boxes(detected, self.options.merge_tolerance);
        if boxes.is_empty() {
            debug!("no text found");
            return Ok(PipelineOutput {
                image,
                boxes,
                cache_info: CacheInfo::new(boxes_cached, true, true),
            });
        }

        let mut canvas = image.to_rgba8();
        let crops = crop_regions(&canvas, &boxes);

        debug!("reading {} regions", crops.len());
        let layout_hash = cache::layout_hash(&image_hash, &boxes)?;
        let mut untranslated = Vec::with_capacity(crops.len());
        let mut extract_cached = true;
        for (idx, crop) in crops.iter().enumerate() {
            let region = DynamicImage::ImageRgba8(crop.clone());
            let key = cache::region_key(&layout_hash, idx);
            let (text, cached) = self
                .cache
                .get_or_compute(CacheRegion::ReadText, &key, || self.reader.read(&region))?;
            extract_cached &= cached;
            untranslated.push(text);
        }

        debug!("translating batch");
        let batch_key = cache::batch_key(&untranslated)?;
        let (texts, translate_cached) = self
            .cache
            .get_or_compute_async(CacheRegion::Translate, &batch_key, || {
                self.translator.translate_batch(&untranslated)
            })
            .await?;
        if texts.len() != boxes.len() {
            return Err(anyhow!(
                "expected {} translations, got {}",
                boxes.len(),
                texts.len()
            ));
        }

        debug!("drawing text");
        let fills = crops.iter().map(text_fill).collect::<Vec<_>>();
        paste_background(&mut canvas, &crops, &boxes);
        self.renderer
            .render(&mut canvas, &boxes, &texts, &fills, self.options.debug)?;

        Ok(PipelineOutput {
            image: DynamicImage::ImageRgba8(canvas),
            boxes,
            cache_info: CacheInfo::new(boxes_cached, extract_cached, translate_cached),
        })
    }
}

impl<D, R, T> Pipeline for TranslationPipeline<D, R, T>
where
    D: BoxDetector,
    R: TextReader,
    T: BatchTranslator,
{
    fn run_expanded<'a>(&'a self, image: DynamicImage) -> StageFuture<'a, PipelineOutput> {
        Box::pin(self.run(image))
    }
}

pub type StandardPipeline = TranslationPipeline<TesseractDetector, TesseractReader, OpenAiTranslator>;

/// The production pipeline: tesseract for detection and reading, an
/// OpenAI-compatible endpoint for translation.
pub fn standard_pipeline(
    settings: &Settings,
    cache: CacheLayer,
    debug: bool,
) -> Result<StandardPipeline> {
    let detector = TesseractDetector::new(&settings.ocr_languages)?;
    let reader = TesseractReader::new(&settings.ocr_languages)?;
    let translator = OpenAiTranslator::new(settings)?;
    let renderer = OverlayRenderer::new(settings.font_size, settings.font_path.as_deref());
    if !cache.is_enabled() {
        debug!("stage cache disabled, every stage is computed");
    }
    let options = PipelineOptions {
        max_boxes: settings.max_boxes,
        merge_tolerance: settings.merge_tolerance,
        debug,
    };
    Ok(TranslationPipeline::new(
        detector, reader, translator, renderer, cache, options,
    ))
}
