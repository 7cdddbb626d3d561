pub mod client;
pub mod image;
mod repair;

pub use client::{
    DistributionMode, GenerationRequest, GenerationResponse, GeneratorConfig,
    HttpQuestionGenerator, QuestionGenerator,
};
pub use image::{
    HttpImageRenderer, IllustrationRequest, ImageRenderer, RendererConfig, RenderedImage,
};
