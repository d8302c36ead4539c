use crate::format::imagen::{PredictInstance, PredictParameters, PredictRequest};
use crate::format::openai::ImagesRequest;

const MAX_SAMPLES: u32 = 4;

/// Translate an OpenAI images.generations request into an Imagen :predict
/// body. The caller validates that a prompt is present.
pub fn images_to_predict(request: &ImagesRequest, prompt: &str) -> PredictRequest {
    PredictRequest {
        instances: vec![PredictInstance {
            prompt: prompt.to_string(),
        }],
        parameters: PredictParameters {
            sample_count: request.n.unwrap_or(1).clamp(1, MAX_SAMPLES),
            aspect_ratio: aspect_ratio_from_size(request.size.as_deref()),
            safety_setting: "block_medium_and_above",
        },
    }
}

/// `WxH` size strings map onto the closest Imagen aspect ratio: wide sizes
/// become 16:9, tall ones 9:16, everything else (or unparseable) 1:1.
fn aspect_ratio_from_size(size: Option<&str>) -> String {
    let Some(size) = size else {
        return "1:1".to_string();
    };
    let Some((w, h)) = size.split_once(['x', 'X']) else {
        return "1:1".to_string();
    };
    let (Ok(w), Ok(h)) = (w.trim().parse::<u32>(), h.trim().parse::<u32>()) else {
        return "1:1".to_string();
    };

    if w > h {
        "16:9".to_string()
    } else if h > w {
        "9:16".to_string()
    } else {
        "1:1".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(n: Option<u32>, size: Option<&str>) -> ImagesRequest {
        ImagesRequest {
            model: Some("imagen-3.0-generate-002".to_string()),
            prompt: Some("a lighthouse at dusk".to_string()),
            n,
            size: size.map(String::from),
        }
    }

    #[test]
    fn test_sample_count_capped() {
        let out = images_to_predict(&request(Some(10), None), "a lighthouse at dusk");
        assert_eq!(out.parameters.sample_count, 4);

        let out = images_to_predict(&request(None, None), "a lighthouse at dusk");
        assert_eq!(out.parameters.sample_count, 1);
    }

    #[test]
    fn test_aspect_ratio_wide() {
        let out = images_to_predict(&request(None, Some("1792x1024")), "p");
        assert_eq!(out.parameters.aspect_ratio, "16:9");
    }

    #[test]
    fn test_aspect_ratio_tall() {
        let out = images_to_predict(&request(None, Some("1024x1792")), "p");
        assert_eq!(out.parameters.aspect_ratio, "9:16");
    }

    #[test]
    fn test_aspect_ratio_square_and_invalid() {
        let out = images_to_predict(&request(None, Some("1024x1024")), "p");
        assert_eq!(out.parameters.aspect_ratio, "1:1");

        let out = images_to_predict(&request(None, Some("huge")), "p");
        assert_eq!(out.parameters.aspect_ratio, "1:1");

        let out = images_to_predict(&request(None, None), "p");
        assert_eq!(out.parameters.aspect_ratio, "1:1");
    }

    #[test]
    fn test_prompt_and_safety() {
        let out = images_to_predict(&request(None, None), "a lighthouse at dusk");
        assert_eq!(out.instances[0].prompt, "a lighthouse at dusk");
        assert_eq!(out.parameters.safety_setting, "block_medium_and_above");
    }
}
