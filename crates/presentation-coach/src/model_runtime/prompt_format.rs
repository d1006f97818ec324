//! Prompt templates and generation limits for the LLaVA-style vision model.

/// Token that ends a LLaVA 1.5 response.
pub const STOP_TOKEN: &str = "</s>";

/// Vision model sequence length, used as the generation budget.
pub const VISION_SEQ_LEN: u32 = 2048;

pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Chat preamble prefilled once after load. Without it the model produces
/// unstructured output for the first analyses.
pub const PRESET_PROMPT: &str = "A chat between a curious human and an artificial intelligence assistant. \
The assistant gives helpful, detailed, and polite answers to the human's questions. USER: ";

pub const COACH_INSTRUCTION: &str = "You are a professional presentation coach AI. Analyze the presenter's \
performance and provide a grade (A, B, C, D, or F) for each of the following aspects: \
1. Eye Contact - Are they looking at the camera/audience? \
2. Framing - Is the person properly centered and visible? \
3. Posture - Do they have good posture and body language? \
4. Lighting - Is the lighting adequate and flattering? \
Provide your response in this exact format:\n\
Eye Contact: [Grade]\n\
Framing: [Grade]\n\
Posture: [Grade]\n\
Lighting: [Grade]\n\
Explanation: [Brief explanation of the grades]";
