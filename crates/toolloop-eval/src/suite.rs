//! Built-in evaluation cases.

use serde::{Deserialize, Serialize};

/// One prompt with its expected normalised answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvalCase {
    pub name: String,
    pub prompt: String,
    /// Compared against [`normalize_outcome`](crate::normalize::normalize_outcome).
    pub expected: String,
}

impl EvalCase {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            expected: expected.into(),
        }
    }
}

const ARITHMETIC: &str = "Calculate (2^10 + 3^5) * 7 - 100. \
Use the python_expression tool and then submit the answer.";

const REVIEW_SENTIMENT: &str = r#"Analyze the following restaurant review and determine whether the review should
be classified as positive or negative. The result should be either "positive" or
"negative" and nothing else.

Here is the review:
"Finding the entrance of the restaurant felt nearly impossible so my party and I
arrived already frustrated. Then on top of that the service was slow so we were
cranky by the time we got it.

I have to say though that the food quality was good and our waiter tried her best
so I'll give them a pass. If I'm in the area I'd go again..  Please fix your signage
though!! We were miserable when we arrived and it almost wasn't worth it!""#;

const PHONE_VALIDATION: &str = r#"You will be given a list of phone numbers.
For each item in the list, determine if it is a valid U.S. phone number.

Rules:
- Each result must be exactly one of: "valid" or "invalid".
- Valid separators are spaces, dashes (-), dots (.), or parentheses (() and ())).
- Do not return anything else.

Example:
Input: ["(123)456-7890", "1-800-GOT-JUNK", "123!456!7890"]
Output: ["valid", "valid", "invalid"]

Now classify this list:
["817,742,0078", "1-800-FLOWERS", "817*742*0078", "817-123-4567"]"#;

const MULTI_STEP_ARITHMETIC: &str = r#"Evaluate the following series of expressions using the python_expression tool:

1) Add two cubed and three raised to the power of four.
2) Add the sum of the prime digits of the result to the result. Then add 1.
3) If the result is greater than or equal to 90, halve it; otherwise subtract 5.
4) Add one third of the result to itself. Round to the nearest integer (ties go up).
5) Divide the result by 7, then round to the nearest integer (ties go up).

After you finish, call the tool named submit_answer with only the final number."#;

const JSON_VALIDITY: &str = r#"You will be given a list of JSON objects.
For each item in the list, determine if the JSON is valid.

Rules:
- Return only the list of results, in the same order as the input.
- Each result must be exactly one of: "valid" or "invalid".
- Do not return anything else.

Example:
Input: [{"id": 123, "active": true}, {"name": 'Jane',"age": 22}, {"id": 123, "active": true}]
Output: ["valid", "invalid", "valid"]

Now classify this list:
[
    {"name": Bob, "age": 25},
    {"name": "Jacob", "age": 65},
    {'name': 'Carol', 'age': 30},
    {"name": "Alice"; "age": 65}
]"#;

const CUISINE: &str = r#"You will be given a list of strings containing food items.
For each item in the list, determine the correct cuisine type.

Rules:
- Return only the list of results, in the same order as the input.
- Each result must be exactly one of: "Thai", "Mexican", "Chinese",
"South African", "American", "Dutch".
- Tex-Mex dishes should be classified as American, not Mexican.
- Do not return anything else.

Example:
Input: ["Shrimp Pad Thai", "Grilled Cheese", "Quesadillas"]
Output: ["Thai", "American", "Mexican"]

Now classify this list:
["Pannekoeke (Afrikaans style)", "Fajitas", "Orange Chicken", "Stroopwafel", "Massaman Curry"]"#;

/// The built-in suite, in run order.
pub fn builtin_cases() -> Vec<EvalCase> {
    vec![
        EvalCase::new("arithmetic", ARITHMETIC, "8769"),
        EvalCase::new("review-sentiment", REVIEW_SENTIMENT, "positive"),
        EvalCase::new(
            "phone-validation",
            PHONE_VALIDATION,
            "['invalid', 'valid', 'invalid', 'valid']",
        ),
        EvalCase::new("multi-step-arithmetic", MULTI_STEP_ARITHMETIC, "9"),
        EvalCase::new(
            "json-validity",
            JSON_VALIDITY,
            "['invalid', 'valid', 'invalid', 'invalid']",
        ),
        EvalCase::new(
            "cuisine",
            CUISINE,
            "['South African', 'American', 'Chinese', 'Dutch', 'Thai']",
        ),
    ]
}

/// Look up a built-in case by name.
pub fn find_case(name: &str) -> Option<EvalCase> {
    builtin_cases().into_iter().find(|c| c.name == name)
}
