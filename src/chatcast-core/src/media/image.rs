//! Character portraits from an OpenAI-compatible image endpoint.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ImageConfig;
use crate::error::ChatCastError;
use crate::media::MediaJob;

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: String,
    n: u8,
    size: &'a str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

pub struct ImageClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    config: ImageConfig,
}

impl ImageClient {
    pub fn new(
        config: ImageConfig,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ChatCastError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            config,
        })
    }

    /// Fill the prompt template for a job.
    pub fn prompt_for(&self, job: &MediaJob) -> String {
        render_prompt(&self.config.prompt_template, job)
    }

    /// Generate a portrait for the job and save it in the scratch directory.
    pub async fn generate(&self, job: &MediaJob) -> Result<PathBuf, ChatCastError> {
        let request = ImageRequest {
            model: &self.config.model,
            prompt: self.prompt_for(job),
            n: 1,
            size: &self.config.size,
            response_format: "url",
        };

        let response: ImageResponse = self
            .http
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let url = response
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ChatCastError::ImageError("Response contained no image".to_string()))?;

        let bytes = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let path = job.output_path("png");
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

fn render_prompt(template: &str, job: &MediaJob) -> String {
    let description = job
        .character
        .image_prompt
        .as_deref()
        .unwrap_or(job.character.name.as_str());

    template
        .replace("{name}", &job.character.name)
        .replace("{description}", description)
        .replace("{text}", &job.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Character;

    fn job(character: Character) -> MediaJob {
        MediaJob {
            request_id: 3,
            character,
            text: "I cast fireball".to_string(),
            scratch_dir: PathBuf::from("local"),
            estimated_duration: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_render_prompt_uses_description() {
        let character = Character::new("wizard", "Merlin", "bm_lewis")
            .with_image_prompt("an old wizard with a long beard");
        let prompt = render_prompt("{description}, saying \"{text}\"", &job(character));
        assert_eq!(prompt, "an old wizard with a long beard, saying \"I cast fireball\"");
    }

    #[test]
    fn test_render_prompt_falls_back_to_name() {
        let character = Character::new("wizard", "Merlin", "bm_lewis");
        let prompt = render_prompt("Portrait of {description} ({name})", &job(character));
        assert_eq!(prompt, "Portrait of Merlin (Merlin)");
    }

    #[test]
    fn test_parse_image_response() {
        let json = r#"{"created": 1, "data": [{"url": "https://img.example/1.png"}]}"#;
        let response: ImageResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data[0].url.as_deref(), Some("https://img.example/1.png"));
    }
}
